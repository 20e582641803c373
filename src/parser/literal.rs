// 该文件是 Laoshu （老鼠巡检） 项目的一部分。
// src/parser/literal.rs - 宽松字面量解析
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

//! 类 JSON 方言的解析，作为严格 JSON 失败后的后备。
//!
//! 接受：单/双引号字符串、`True`/`False`/`None` 及 JSON 字面量、
//! 元组（视为数组）、尾随逗号、以标量作为映射的键。

use serde_json::{Map, Number, Value};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message} (at offset {offset})")]
pub struct LiteralError {
  pub offset: usize,
  pub message: String,
}

pub fn parse_literal(text: &str) -> Result<Value, LiteralError> {
  let mut parser = LiteralParser {
    chars: text.chars().collect(),
    pos: 0,
  };
  let value = parser.value()?;
  parser.skip_whitespace();
  if parser.pos < parser.chars.len() {
    return Err(parser.error("unexpected trailing characters"));
  }
  Ok(value)
}

struct LiteralParser {
  chars: Vec<char>,
  pos: usize,
}

impl LiteralParser {
  fn error(&self, message: impl Into<String>) -> LiteralError {
    LiteralError {
      offset: self.pos,
      message: message.into(),
    }
  }

  fn peek(&self) -> Option<char> {
    self.chars.get(self.pos).copied()
  }

  fn bump(&mut self) -> Option<char> {
    let ch = self.peek()?;
    self.pos += 1;
    Some(ch)
  }

  fn skip_whitespace(&mut self) {
    while self.peek().is_some_and(char::is_whitespace) {
      self.pos += 1;
    }
  }

  fn expect(&mut self, expected: char) -> Result<(), LiteralError> {
    match self.bump() {
      Some(ch) if ch == expected => Ok(()),
      Some(ch) => {
        self.pos -= 1;
        Err(self.error(format!("expected '{}', found '{}'", expected, ch)))
      }
      None => Err(self.error(format!("expected '{}', found end of input", expected))),
    }
  }

  fn value(&mut self) -> Result<Value, LiteralError> {
    self.skip_whitespace();
    match self.peek() {
      Some('{') => self.mapping(),
      Some('[') => self.sequence('[', ']'),
      Some('(') => self.sequence('(', ')'),
      Some('"') | Some('\'') => self.string().map(Value::String),
      Some(ch) if ch == '-' || ch == '+' || ch == '.' || ch.is_ascii_digit() => self.number(),
      Some(ch) if ch.is_ascii_alphabetic() => self.word(),
      Some(ch) => Err(self.error(format!("unexpected character '{}'", ch))),
      None => Err(self.error("unexpected end of input")),
    }
  }

  fn mapping(&mut self) -> Result<Value, LiteralError> {
    self.expect('{')?;
    let mut map = Map::new();
    loop {
      self.skip_whitespace();
      if self.peek() == Some('}') {
        self.pos += 1;
        return Ok(Value::Object(map));
      }

      let key = match self.value()? {
        Value::String(s) => s,
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => "null".to_string(),
        _ => return Err(self.error("mapping keys must be scalars")),
      };
      self.skip_whitespace();
      self.expect(':')?;
      let value = self.value()?;
      map.insert(key, value);

      self.skip_whitespace();
      match self.bump() {
        Some(',') => continue,
        Some('}') => return Ok(Value::Object(map)),
        _ => {
          self.pos = self.pos.saturating_sub(1);
          return Err(self.error("expected ',' or '}' in mapping"));
        }
      }
    }
  }

  fn sequence(&mut self, open: char, close: char) -> Result<Value, LiteralError> {
    self.expect(open)?;
    let mut items = Vec::new();
    loop {
      self.skip_whitespace();
      if self.peek() == Some(close) {
        self.pos += 1;
        return Ok(Value::Array(items));
      }

      items.push(self.value()?);

      self.skip_whitespace();
      match self.bump() {
        Some(',') => continue,
        Some(ch) if ch == close => return Ok(Value::Array(items)),
        _ => {
          self.pos = self.pos.saturating_sub(1);
          return Err(self.error(format!("expected ',' or '{}' in sequence", close)));
        }
      }
    }
  }

  fn string(&mut self) -> Result<String, LiteralError> {
    let quote = self.bump().ok_or_else(|| self.error("expected string"))?;
    let mut out = String::new();
    loop {
      match self.bump() {
        None => return Err(self.error("unterminated string")),
        Some(ch) if ch == quote => return Ok(out),
        Some('\\') => {
          let escaped = self
            .bump()
            .ok_or_else(|| self.error("unterminated escape sequence"))?;
          match escaped {
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            'b' => out.push('\u{0008}'),
            'f' => out.push('\u{000C}'),
            '0' => out.push('\0'),
            'x' => out.push(self.hex_escape(2)?),
            'u' => out.push(self.hex_escape(4)?),
            // 其余转义（引号、反斜杠、斜杠等）取字符本身
            other => out.push(other),
          }
        }
        Some(ch) => out.push(ch),
      }
    }
  }

  fn hex_escape(&mut self, digits: usize) -> Result<char, LiteralError> {
    let end = self.pos + digits;
    if end > self.chars.len() {
      return Err(self.error("truncated hex escape"));
    }
    let hex: String = self.chars[self.pos..end].iter().collect();
    let code = u32::from_str_radix(&hex, 16).map_err(|_| self.error("invalid hex escape"))?;
    self.pos = end;
    char::from_u32(code).ok_or_else(|| self.error("invalid unicode escape"))
  }

  fn number(&mut self) -> Result<Value, LiteralError> {
    let start = self.pos;
    while self
      .peek()
      .is_some_and(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | '.' | 'e' | 'E' | '_'))
    {
      self.pos += 1;
    }
    let raw: String = self.chars[start..self.pos]
      .iter()
      .filter(|c| **c != '_')
      .collect();

    if let Ok(int) = raw.parse::<i64>() {
      return Ok(Value::Number(int.into()));
    }
    raw
      .parse::<f64>()
      .ok()
      .and_then(Number::from_f64)
      .map(Value::Number)
      .ok_or_else(|| LiteralError {
        offset: start,
        message: format!("invalid number '{}'", raw),
      })
  }

  fn word(&mut self) -> Result<Value, LiteralError> {
    let start = self.pos;
    while self
      .peek()
      .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_')
    {
      self.pos += 1;
    }
    let word: String = self.chars[start..self.pos].iter().collect();
    match word.as_str() {
      "True" | "true" => Ok(Value::Bool(true)),
      "False" | "false" => Ok(Value::Bool(false)),
      "None" | "null" => Ok(Value::Null),
      _ => Err(LiteralError {
        offset: start,
        message: format!("unknown identifier '{}'", word),
      }),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn parses_python_style_literals() {
    let value = parse_literal(
      "{'label': 'rat', 'ok': True, 'gone': None, 'n': -2, 'xs': (1, 2.5,), 'q': \"it's\"}",
    )
    .unwrap();
    assert_eq!(
      value,
      json!({"label": "rat", "ok": true, "gone": null, "n": -2, "xs": [1, 2.5], "q": "it's"})
    );
  }

  #[test]
  fn accepts_trailing_commas_and_scalar_keys() {
    let value = parse_literal("{1: [1, 2,], 'a': {},}").unwrap();
    assert_eq!(value, json!({"1": [1, 2], "a": {}}));
  }

  #[test]
  fn handles_escapes() {
    let value = parse_literal(r"'a\'b\né\x41'").unwrap();
    assert_eq!(value, json!("a'b\néA"));
  }

  #[test]
  fn rejects_garbage() {
    assert!(parse_literal("not-json").is_err());
    assert!(parse_literal("{'a': 1").is_err());
    assert!(parse_literal("{'a' 1}").is_err());
    assert!(parse_literal("'open").is_err());
    assert!(parse_literal("[1] 2").is_err());
    assert!(parse_literal("").is_err());
  }
}
