use std::fmt;

/// 可嵌入WHERE子句的谓词树，`Display` 输出SQL条件文本
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Compare {
        column: &'static str,
        op: CompareOp,
        value: SqlValue,
    },
    Like {
        column: &'static str,
        pattern: String,
        negated: bool,
    },
    InList {
        column: &'static str,
        values: Vec<SqlValue>,
        negated: bool,
    },
    /// 作业上存在名称为 `label` 且值满足 `value` 的标签
    LabelExists {
        label: String,
        value: Box<Predicate>,
    },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl CompareOp {
    fn as_sql(self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "<>",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Text(String),
    Integer(i64),
    Float(f64),
}

fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Text(value) => f.write_str(&quote(value)),
            SqlValue::Integer(value) => write!(f, "{value}"),
            // Debug格式保证至少一位小数: 50 -> 50.0
            SqlValue::Float(value) => write!(f, "{value:?}"),
        }
    }
}

fn write_joined(f: &mut fmt::Formatter<'_>, children: &[Predicate], separator: &str) -> fmt::Result {
    f.write_str("(")?;
    for (idx, child) in children.iter().enumerate() {
        if idx > 0 {
            f.write_str(separator)?;
        }
        write!(f, "{child}")?;
    }
    f.write_str(")")
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Compare { column, op, value } => {
                write!(f, "({column} {} {value})", op.as_sql())
            }
            Predicate::Like {
                column,
                pattern,
                negated,
            } => {
                let keyword = if *negated { "NOT LIKE" } else { "LIKE" };
                write!(f, "({column} {keyword} {})", quote(pattern))
            }
            Predicate::InList {
                column,
                values,
                negated,
            } => {
                let list = values
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(",");
                if *negated {
                    write!(f, "(NOT ({column} IN ({list}) ))")
                } else {
                    write!(f, "({column} IN ({list}) )")
                }
            }
            Predicate::LabelExists { label, value } => write!(
                f,
                "(EXISTS (SELECT * FROM label WHERE ((job.partition_id = label.partition_id) AND (job.job_id = label.job_id) AND (label.label = {}) AND {value})))",
                quote(label)
            ),
            Predicate::And(children) => write_joined(f, children, " AND "),
            Predicate::Or(children) => write_joined(f, children, " OR "),
        }
    }
}
