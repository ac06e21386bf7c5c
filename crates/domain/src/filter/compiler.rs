use super::ast::{Comparison, Node};
use super::predicate::{CompareOp, Predicate, SqlValue};
use super::FilterError;

/// 标签选择器前缀
const LABEL_PREFIX: &str = "labels.";
const LABEL_VALUE_COLUMN: &str = "label.value";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnType {
    Text,
    Integer,
    Float,
}

fn resolve_column(selector: &str) -> Option<(&'static str, ColumnType)> {
    let column = match selector {
        "id" => ("job.job_id", ColumnType::Text),
        "name" => ("job.name", ColumnType::Text),
        "createTime" => ("job.create_date", ColumnType::Integer),
        "lastUpdateTime" => ("job.last_update_date", ColumnType::Integer),
        "status" => ("job.status", ColumnType::Text),
        "percentageComplete" => ("job.percentage_complete", ColumnType::Float),
        _ => return None,
    };
    Some(column)
}

#[derive(Debug, Clone, Copy)]
enum Operator {
    Compare(CompareOp),
    In,
    Out,
}

fn resolve_operator(symbol: &str) -> Result<Operator, FilterError> {
    let operator = match symbol {
        "==" => Operator::Compare(CompareOp::Eq),
        "!=" => Operator::Compare(CompareOp::Ne),
        "=gt=" | ">" => Operator::Compare(CompareOp::Gt),
        "=ge=" | ">=" => Operator::Compare(CompareOp::Ge),
        "=lt=" | "<" => Operator::Compare(CompareOp::Lt),
        "=le=" | "<=" => Operator::Compare(CompareOp::Le),
        "=in=" => Operator::In,
        "=out=" => Operator::Out,
        other => return Err(FilterError::UnknownOperator(other.to_string())),
    };
    Ok(operator)
}

/// 转义LIKE元字符后再把用户的 `*` 转为 `%`，顺序不可调换
fn to_like_pattern(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('_', "\\_")
        .replace('%', "\\%")
        .replace('*', "%")
}

fn typed_value(selector: &str, argument: &str, column_type: ColumnType) -> Result<SqlValue, FilterError> {
    let invalid = |reason: &str| FilterError::InvalidArgument {
        selector: selector.to_string(),
        argument: argument.to_string(),
        reason: reason.to_string(),
    };

    match column_type {
        ColumnType::Text => Ok(SqlValue::Text(argument.to_string())),
        ColumnType::Integer => argument
            .parse::<i64>()
            .map(SqlValue::Integer)
            .map_err(|_| invalid("expected an integer")),
        ColumnType::Float => argument
            .parse::<f64>()
            .ok()
            .filter(|value| value.is_finite())
            .map(SqlValue::Float)
            .ok_or_else(|| invalid("expected a number")),
    }
}

fn compile_comparison(
    comparison: &Comparison,
    column: &'static str,
    column_type: ColumnType,
) -> Result<Predicate, FilterError> {
    let selector = comparison.selector.as_str();
    let operator = resolve_operator(&comparison.operator)?;

    match operator {
        Operator::In | Operator::Out => {
            let values = comparison
                .arguments
                .iter()
                .map(|argument| typed_value(selector, argument, column_type))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Predicate::InList {
                column,
                values,
                negated: matches!(operator, Operator::Out),
            })
        }
        Operator::Compare(op) => {
            let argument = match comparison.arguments.as_slice() {
                [single] => single,
                _ => {
                    return Err(FilterError::InvalidArgument {
                        selector: selector.to_string(),
                        argument: comparison.arguments.join(","),
                        reason: format!("operator {} expects a single argument", comparison.operator),
                    })
                }
            };

            let is_pattern = column_type == ColumnType::Text
                && argument.contains('*')
                && matches!(op, CompareOp::Eq | CompareOp::Ne);
            if is_pattern {
                return Ok(Predicate::Like {
                    column,
                    pattern: to_like_pattern(argument),
                    negated: op == CompareOp::Ne,
                });
            }

            Ok(Predicate::Compare {
                column,
                op,
                value: typed_value(selector, argument, column_type)?,
            })
        }
    }
}

/// 将语法树编译为谓词树，不访问存储
pub fn compile(node: &Node) -> Result<Predicate, FilterError> {
    match node {
        Node::And(children) => Ok(Predicate::And(
            children.iter().map(compile).collect::<Result<_, _>>()?,
        )),
        Node::Or(children) => Ok(Predicate::Or(
            children.iter().map(compile).collect::<Result<_, _>>()?,
        )),
        Node::Comparison(comparison) => {
            if let Some(label) = comparison.selector.strip_prefix(LABEL_PREFIX) {
                if label.is_empty() {
                    return Err(FilterError::UnknownSelector(comparison.selector.clone()));
                }
                let value = compile_comparison(comparison, LABEL_VALUE_COLUMN, ColumnType::Text)?;
                return Ok(Predicate::LabelExists {
                    label: label.to_string(),
                    value: Box::new(value),
                });
            }

            let (column, column_type) = resolve_column(&comparison.selector)
                .ok_or_else(|| FilterError::UnknownSelector(comparison.selector.clone()))?;
            compile_comparison(comparison, column, column_type)
        }
    }
}
