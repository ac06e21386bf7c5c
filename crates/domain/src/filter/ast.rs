/// 过滤表达式语法树
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    And(Vec<Node>),
    Or(Vec<Node>),
    Comparison(Comparison),
}

/// `selector operator argument(s)`，运算符保留原始符号，由编译阶段识别
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comparison {
    pub selector: String,
    pub operator: String,
    pub arguments: Vec<String>,
}

impl Comparison {
    pub fn new(selector: impl Into<String>, operator: impl Into<String>, arguments: Vec<String>) -> Self {
        Self {
            selector: selector.into(),
            operator: operator.into(),
            arguments,
        }
    }
}
