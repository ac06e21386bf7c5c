//! RSQL风格过滤表达式的词法和语法分析
//!
//! ```text
//! or         = and { ("," | " or ") and }
//! and        = constraint { (";" | " and ") constraint }
//! constraint = "(" or ")" | comparison
//! comparison = selector operator arguments
//! operator   = "=" {alpha} "=" | "!=" | "<" ["="] | ">" ["="]
//! arguments  = "(" value { "," value } ")" | value
//! value      = unreserved-string | quoted-string
//! ```

use super::ast::{Comparison, Node};
use super::FilterError;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    LParen,
    RParen,
    Semicolon,
    Comma,
    Operator(String),
    Word(String),
    Quoted(String),
}

fn is_reserved(c: char) -> bool {
    c.is_whitespace() || matches!(c, '"' | '\'' | '(' | ')' | ';' | ',' | '=' | '!' | '~' | '<' | '>')
}

fn parse_error(position: usize, message: impl Into<String>) -> FilterError {
    FilterError::Parse {
        position,
        message: message.into(),
    }
}

fn tokenize(input: &str) -> Result<Vec<(Token, usize)>, FilterError> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some(&(pos, c)) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' | ')' | ';' | ',' => {
                chars.next();
                let token = match c {
                    '(' => Token::LParen,
                    ')' => Token::RParen,
                    ';' => Token::Semicolon,
                    _ => Token::Comma,
                };
                tokens.push((token, pos));
            }
            '=' => {
                chars.next();
                let mut operator = String::from("=");
                while let Some(&(_, next)) = chars.peek() {
                    if next.is_ascii_alphabetic() {
                        operator.push(next);
                        chars.next();
                    } else {
                        break;
                    }
                }
                match chars.next() {
                    Some((_, '=')) => operator.push('='),
                    _ => return Err(parse_error(pos, format!("incomplete operator '{operator}'"))),
                }
                tokens.push((Token::Operator(operator), pos));
            }
            '!' => {
                chars.next();
                match chars.next() {
                    Some((_, '=')) => tokens.push((Token::Operator("!=".to_string()), pos)),
                    _ => return Err(parse_error(pos, "expected '=' after '!'")),
                }
            }
            '<' | '>' => {
                chars.next();
                let mut operator = c.to_string();
                if let Some(&(_, '=')) = chars.peek() {
                    chars.next();
                    operator.push('=');
                }
                tokens.push((Token::Operator(operator), pos));
            }
            '\'' | '"' => {
                chars.next();
                let quote = c;
                let mut value = String::new();
                let mut closed = false;
                while let Some((_, next)) = chars.next() {
                    match next {
                        '\\' => match chars.next() {
                            Some((_, escaped)) => value.push(escaped),
                            None => break,
                        },
                        next if next == quote => {
                            closed = true;
                            break;
                        }
                        next => value.push(next),
                    }
                }
                if !closed {
                    return Err(parse_error(pos, "unterminated quoted argument"));
                }
                tokens.push((Token::Quoted(value), pos));
            }
            '~' => return Err(parse_error(pos, "unexpected character '~'")),
            _ => {
                let mut word = String::new();
                while let Some(&(_, next)) = chars.peek() {
                    if is_reserved(next) {
                        break;
                    }
                    word.push(next);
                    chars.next();
                }
                tokens.push((Token::Word(word), pos));
            }
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<(Token, usize)>,
    index: usize,
    end: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.index).map(|(token, _)| token)
    }

    fn position(&self) -> usize {
        self.tokens
            .get(self.index)
            .map(|(_, pos)| *pos)
            .unwrap_or(self.end)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.index).map(|(token, _)| token.clone());
        self.index += 1;
        token
    }

    fn is_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Word(word)) if word.eq_ignore_ascii_case(keyword))
    }

    fn parse_or(&mut self) -> Result<Node, FilterError> {
        let mut children = vec![self.parse_and()?];
        while matches!(self.peek(), Some(Token::Comma)) || self.is_keyword("or") {
            self.advance();
            children.push(self.parse_and()?);
        }
        Ok(if children.len() == 1 {
            children.remove(0)
        } else {
            Node::Or(children)
        })
    }

    fn parse_and(&mut self) -> Result<Node, FilterError> {
        let mut children = vec![self.parse_constraint()?];
        while matches!(self.peek(), Some(Token::Semicolon)) || self.is_keyword("and") {
            self.advance();
            children.push(self.parse_constraint()?);
        }
        Ok(if children.len() == 1 {
            children.remove(0)
        } else {
            Node::And(children)
        })
    }

    fn parse_constraint(&mut self) -> Result<Node, FilterError> {
        if matches!(self.peek(), Some(Token::LParen)) {
            self.advance();
            let node = self.parse_or()?;
            return match self.advance() {
                Some(Token::RParen) => Ok(node),
                _ => Err(parse_error(self.position(), "expected ')'")),
            };
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Node, FilterError> {
        let position = self.position();
        let selector = match self.advance() {
            Some(Token::Word(word)) => word,
            _ => return Err(parse_error(position, "expected a selector")),
        };

        let position = self.position();
        let operator = match self.advance() {
            Some(Token::Operator(operator)) => operator,
            _ => return Err(parse_error(position, format!("expected an operator after '{selector}'"))),
        };

        let arguments = self.parse_arguments()?;
        Ok(Node::Comparison(Comparison::new(selector, operator, arguments)))
    }

    fn parse_arguments(&mut self) -> Result<Vec<String>, FilterError> {
        if !matches!(self.peek(), Some(Token::LParen)) {
            return Ok(vec![self.parse_value()?]);
        }

        self.advance();
        let mut values = vec![self.parse_value()?];
        loop {
            let position = self.position();
            match self.advance() {
                Some(Token::Comma) => values.push(self.parse_value()?),
                Some(Token::RParen) => return Ok(values),
                _ => return Err(parse_error(position, "expected ',' or ')' in argument list")),
            }
        }
    }

    fn parse_value(&mut self) -> Result<String, FilterError> {
        let position = self.position();
        match self.advance() {
            Some(Token::Word(word)) | Some(Token::Quoted(word)) => Ok(word),
            _ => Err(parse_error(position, "expected an argument")),
        }
    }
}

/// 解析过滤表达式
pub fn parse(input: &str) -> Result<Node, FilterError> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(parse_error(0, "empty expression"));
    }

    let mut parser = Parser {
        tokens,
        index: 0,
        end: input.len(),
    };
    let node = parser.parse_or()?;

    if parser.index < parser.tokens.len() {
        return Err(parse_error(parser.position(), "unexpected trailing input"));
    }

    Ok(node)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn comparison(selector: &str, operator: &str, arguments: &[&str]) -> Node {
        Node::Comparison(Comparison::new(
            selector,
            operator,
            arguments.iter().map(|a| a.to_string()).collect(),
        ))
    }

    #[test]
    fn test_keywords_and_separators_are_equivalent() {
        let words = parse("status==Active and name==x or id==2").unwrap();
        let symbols = parse("status==Active;name==x,id==2").unwrap();
        assert_eq!(words, symbols);
        assert_eq!(
            words,
            Node::Or(vec![
                Node::And(vec![
                    comparison("status", "==", &["Active"]),
                    comparison("name", "==", &["x"]),
                ]),
                comparison("id", "==", &["2"]),
            ])
        );
    }

    #[test]
    fn test_parentheses_preserve_grouping() {
        let node = parse("(labels.tag==a or labels.tag==b) and labels.tagged==true").unwrap();
        assert_eq!(
            node,
            Node::And(vec![
                Node::Or(vec![
                    comparison("labels.tag", "==", &["a"]),
                    comparison("labels.tag", "==", &["b"]),
                ]),
                comparison("labels.tagged", "==", &["true"]),
            ])
        );
    }

    #[test]
    fn test_argument_list_and_quotes() {
        let node = parse(r#"status=in=(Active, "Wait ing",'Fa\'iled')"#).unwrap();
        assert_eq!(node, comparison("status", "=in=", &["Active", "Wait ing", "Fa'iled"]));
    }

    #[test]
    fn test_alternative_operators_and_unknown_symbols() {
        assert_eq!(parse("percentageComplete>=5").unwrap(), comparison("percentageComplete", ">=", &["5"]));
        assert_eq!(parse("name=like=x").unwrap(), comparison("name", "=like=", &["x"]));
    }

    #[test]
    fn test_malformed_expressions() {
        for input in ["", "status", "status==", "status==(a,b", "(status==a", "status==a and", "status=gt", "name=='abc", "status==a b"] {
            assert!(matches!(parse(input), Err(FilterError::Parse { .. })), "input: {input:?}");
        }
    }
}
