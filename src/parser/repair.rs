// 该文件是 Laoshu （老鼠巡检） 项目的一部分。
// src/parser/repair.rs - 模型输出文本修复
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

//! 模型被要求输出严格 JSON，但常见两类缺陷：
//! 在完整的 JSON 之后多输出闭合符号，或者因输出长度限制被截断。
//! 这里的函数都是纯函数，按定界符类型分别计数。

const DELIMITER_PAIRS: [(char, char); 2] = [('{', '}'), ('[', ']')];

/// 去掉首尾空白、成对的反引号围栏，以及紧跟在开头围栏后的语言标记（如 `json`）
pub fn strip_fences(text: &str) -> &str {
  let trimmed = text.trim();
  let fenced = trimmed.starts_with('`');
  let inner = trimmed
    .trim_matches(|c: char| c == '`' || c == '\n' || c == '\r')
    .trim();
  if fenced { strip_language_tag(inner) } else { inner }
}

fn strip_language_tag(text: &str) -> &str {
  let tag_len = text
    .find(|c: char| !c.is_ascii_alphanumeric())
    .unwrap_or(text.len());
  if tag_len == 0 {
    return text;
  }

  // 只有标记之后紧接着结构体开头时才视为语言标记
  let rest = text[tag_len..].trim_start();
  if rest.starts_with(['{', '[']) {
    rest
  } else {
    text
  }
}

/// 引号之外的字符；未闭合的引号吞掉剩余文本
fn structural_chars(text: &str) -> impl Iterator<Item = char> + '_ {
  let mut quote: Option<char> = None;
  let mut escaped = false;
  text.chars().filter(move |&ch| {
    if let Some(q) = quote {
      if escaped {
        escaped = false;
      } else if ch == '\\' {
        escaped = true;
      } else if ch == q {
        quote = None;
      }
      return false;
    }
    if ch == '"' || ch == '\'' {
      quote = Some(ch);
      return false;
    }
    true
  })
}

fn count_structural(text: &str, target: char) -> usize {
  structural_chars(text).filter(|&ch| ch == target).count()
}

/// 当 `closer` 多于 `opener` 且文本以 `closer` 结尾时，逐个去掉末尾的 `closer`
///
/// 引号内的定界符不计数。
pub fn trim_excess_closers(text: &str, opener: char, closer: char) -> &str {
  let mut result = text.trim_end();
  let opened = count_structural(result, opener);
  let mut closed = count_structural(result, closer);

  while closed > opened {
    match result.strip_suffix(closer) {
      Some(rest) => {
        result = rest.trim_end();
        closed -= 1;
      }
      None => break,
    }
  }

  result
}

/// 计算截断文本缺少的闭合符号，按嵌套顺序（由内到外）返回。
///
/// 引号内的内容不参与计数和嵌套判断；每种定界符追加的数量不超过其计数差。
pub fn missing_closers(text: &str) -> String {
  let mut deficits = DELIMITER_PAIRS.map(|(opener, closer)| {
    count_structural(text, opener).saturating_sub(count_structural(text, closer))
  });
  if deficits.iter().all(|d| *d == 0) {
    return String::new();
  }

  let mut stack = Vec::new();
  for ch in structural_chars(text) {
    match ch {
      '{' => stack.push('}'),
      '[' => stack.push(']'),
      '}' | ']' if stack.last() == Some(&ch) => {
        stack.pop();
      }
      _ => {}
    }
  }

  let mut closers = String::new();
  for closer in stack.into_iter().rev() {
    if let Some(idx) = DELIMITER_PAIRS.iter().position(|(_, c)| *c == closer)
      && deficits[idx] > 0
    {
      deficits[idx] -= 1;
      closers.push(closer);
    }
  }
  closers
}

/// 重新平衡定界符：先去掉多余的尾部闭合符号，再补全截断缺失的闭合符号
pub fn rebalance(text: &str) -> String {
  let mut current = text.trim_end();

  // 两种定界符交错多出时（如 `}]}`），需要反复修剪直到不再变化
  loop {
    let next = DELIMITER_PAIRS
      .iter()
      .fold(current, |acc, (opener, closer)| {
        trim_excess_closers(acc, *opener, *closer)
      });
    if next.len() == current.len() {
      break;
    }
    current = next;
  }

  let mut result = current.to_string();
  result.push_str(&missing_closers(current));
  result
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn strips_fences_and_language_tag() {
    assert_eq!(strip_fences("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
    assert_eq!(strip_fences("  ```\n[1, 2]\n```  "), "[1, 2]");
    assert_eq!(strip_fences("```JSON {}```"), "{}");
    assert_eq!(strip_fences("not-json"), "not-json");
    assert_eq!(strip_fences("nothing here"), "nothing here");
  }

  #[test]
  fn trims_only_trailing_excess() {
    assert_eq!(trim_excess_closers("{}}}", '{', '}'), "{}");
    assert_eq!(trim_excess_closers("{} } \n }", '{', '}'), "{}");
    // 多余的闭合符号不在末尾时不处理
    assert_eq!(trim_excess_closers("}{}]", '{', '}'), "}{}]");
    assert_eq!(trim_excess_closers("[{}]", '{', '}'), "[{}]");
  }

  #[test]
  fn rebalance_removes_interleaved_over_emission() {
    let body = "{'d': [{'b': {'x': 1}}]}";
    assert_eq!(rebalance(&format!("{body}}}]}}")), body);
    assert_eq!(rebalance(&format!("{body}]}}")), body);
  }

  #[test]
  fn rebalance_closes_truncated_structure_in_nesting_order() {
    assert_eq!(
      rebalance(r#"{"d": [{"b": {"x": 1}}"#),
      r#"{"d": [{"b": {"x": 1}}]}"#
    );
    assert_eq!(rebalance(r#"{"d": [{"x": 1"#), r#"{"d": [{"x": 1}]}"#);
  }

  #[test]
  fn rebalance_ignores_delimiters_inside_strings() {
    assert_eq!(rebalance(r#"{"d": ["x{y", 1"#), r#"{"d": ["x{y", 1]}"#);
  }

  #[test]
  fn language_tag_needs_an_opening_fence() {
    assert_eq!(strip_fences("json {}"), "json {}");
    assert_eq!(strip_fences("rat [1]"), "rat [1]");
    assert_eq!(strip_fences("```json\n[1]\n```"), "[1]");
  }

  #[test]
  fn quoted_delimiters_are_not_counted() {
    let text = r#"{"label": "rat}"}"#;
    assert_eq!(trim_excess_closers(text, '{', '}'), text);
    assert_eq!(rebalance(text), text);
    assert_eq!(rebalance(r#"{"label": "{rat"}}"#), r#"{"label": "{rat"}"#);
    assert_eq!(rebalance(r#"{'d': ['a]', 1"#), r#"{'d': ['a]', 1]}"#);
  }

  #[test]
  fn balanced_text_is_unchanged() {
    let text = r#"{"detections": []}"#;
    assert_eq!(rebalance(text), text);
    assert_eq!(missing_closers(text), "");
  }
}
