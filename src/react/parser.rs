//! LLM 回复解析：原始文本 → Action
//!
//! 解析是一段显式的小文法，每一步都可单独测试：
//! 1. 标签提取：`<think>…</think>`（推理，只用于诊断）与 `<explanation>…</explanation>`
//! 2. 载荷定位：先找 ``` 代码块，再做引号感知的单遍括号配对扫描（只看前 64 KiB）
//! 3. 先修复再解析：serde_json → 转义裸换行 / 裸引号后重试 → json5 兜底
//!
//! 解析是全函数：任何输入都得到一个 Action，失败时回退为以剩余文本作答。

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::{CLARIFICATION_TOOL, FINAL_ANSWER_TOOL};

/// 澄清动作缺少 question 时使用的默认问题
pub const DEFAULT_CLARIFICATION: &str = "Could you clarify what you would like me to do?";
/// 回复为空（去掉标签后什么也不剩）时的最终回答
pub const EMPTY_RESPONSE_ANSWER: &str = "I was unable to produce an answer.";

const THINK_TAG: &str = "think";
const EXPLANATION_TAG: &str = "explanation";

/// LLM 下一步要做的事
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Action {
    ToolCall { name: String, args: Value },
    FinalAnswer { text: String },
    ClarificationRequest { question: String },
}

/// 未知工具名的处理方式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownToolPolicy {
    /// 交给分发器，记录一次 UNKNOWN_TOOL 步骤后继续循环
    #[default]
    Dispatch,
    /// 解析阶段直接回退为以原文作答
    Fallback,
}

/// 解析结果：动作 + 诊断信息
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedResponse {
    pub action: Action,
    pub reasoning: Option<String>,
    pub explanation: Option<String>,
    /// 是否走了回退分支（没有可用的结构化载荷）
    pub fallback: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ResponseParser {
    policy: UnknownToolPolicy,
}

impl ResponseParser {
    pub fn new(policy: UnknownToolPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> UnknownToolPolicy {
        self.policy
    }

    pub fn parse_response(&self, raw: &str, known_tools: &[String]) -> ParsedResponse {
        let (reasoning, rest) = extract_tagged(raw, THINK_TAG);
        let (explanation, rest) = extract_tagged(&rest, EXPLANATION_TAG);
        let remaining = rest.trim().to_string();

        let resolved = extract_payload(&remaining)
            .and_then(|payload| self.resolve(payload, known_tools));

        match resolved {
            Some(action) => ParsedResponse {
                action,
                reasoning,
                explanation,
                fallback: false,
            },
            None => {
                let text = [Some(remaining.as_str()), explanation.as_deref(), reasoning.as_deref()]
                    .into_iter()
                    .flatten()
                    .map(str::trim)
                    .find(|t| !t.is_empty())
                    .unwrap_or(EMPTY_RESPONSE_ANSWER)
                    .to_string();
                ParsedResponse {
                    action: Action::FinalAnswer { text },
                    reasoning,
                    explanation,
                    fallback: true,
                }
            }
        }
    }

    /// 载荷 → Action；None 表示回退
    fn resolve(&self, payload: Map<String, Value>, known_tools: &[String]) -> Option<Action> {
        let name = ["tool", "name"]
            .iter()
            .find_map(|k| payload.get(*k).and_then(|v| v.as_str()))?
            .trim()
            .to_string();
        let args = ["args", "arguments", "parameters"]
            .iter()
            .find_map(|k| payload.get(*k))
            .map(normalize_args)
            .unwrap_or_else(|| Value::Object(Map::new()));

        if name == FINAL_ANSWER_TOOL {
            let text = args.get("textResponse").and_then(|v| v.as_str()).map(str::trim)?;
            if text.is_empty() {
                return None;
            }
            return Some(Action::FinalAnswer {
                text: text.to_string(),
            });
        }
        if name == CLARIFICATION_TOOL {
            let question = args
                .get("question")
                .and_then(|v| v.as_str())
                .map(str::trim)
                .filter(|q| !q.is_empty())
                .unwrap_or(DEFAULT_CLARIFICATION);
            return Some(Action::ClarificationRequest {
                question: question.to_string(),
            });
        }
        if name.is_empty() {
            return None;
        }
        if known_tools.iter().any(|k| k == &name) || self.policy == UnknownToolPolicy::Dispatch {
            return Some(Action::ToolCall { name, args });
        }
        tracing::debug!(tool = %name, "unknown tool in payload, falling back to answer");
        None
    }
}

/// 严格解析：未知工具名回退为以原文作答
pub fn parse(raw: &str, known_tools: &[String]) -> Action {
    ResponseParser::new(UnknownToolPolicy::Fallback)
        .parse_response(raw, known_tools)
        .action
}

/// 提取并移除所有 `<tag>…</tag>` 片段；未闭合的开标签把其后全部内容视为标签内容
pub fn extract_tagged(text: &str, tag: &str) -> (Option<String>, String) {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let mut segments: Vec<String> = Vec::new();
    let mut rest = String::with_capacity(text.len());
    let mut cursor = text;

    while let Some(start) = cursor.find(&open) {
        rest.push_str(&cursor[..start]);
        let after = &cursor[start + open.len()..];
        match after.find(&close) {
            Some(end) => {
                segments.push(after[..end].trim().to_string());
                cursor = &after[end + close.len()..];
            }
            None => {
                segments.push(after.trim().to_string());
                cursor = "";
            }
        }
    }
    rest.push_str(cursor);

    let joined = segments
        .into_iter()
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("\n");
    let segment = if joined.is_empty() { None } else { Some(joined) };
    (segment, rest)
}

/// 载荷扫描只看回复的前 64 KiB
const MAX_PAYLOAD_SCAN_BYTES: usize = 64 * 1024;
/// 每条回复最多尝试解析的候选数
const MAX_PAYLOAD_CANDIDATES: usize = 32;

static JSON_FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```(?:json|JSON)?\s*(.*?)\s*```").unwrap());

fn is_tool_payload(obj: &Map<String, Value>) -> bool {
    obj.contains_key("tool") || obj.contains_key("name")
}

/// 截到不超过 max 字节的字符边界
fn clip(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// 定位一个形如 `{tool, args}` 的对象：先看代码块，再单遍扫描裸 JSON
///
/// 扫描维护一个未闭合 '{' 的栈，只在对象内部跟踪字符串（对象外的引号是正文）。
/// 每闭合一个顶层对象就立即尝试它，再按出现顺序尝试其中的嵌套对象；命中即返回。
pub fn extract_payload(text: &str) -> Option<Map<String, Value>> {
    let text = clip(text, MAX_PAYLOAD_SCAN_BYTES);
    let mut attempts = 0usize;
    let mut try_candidate = |candidate: &str| {
        if attempts >= MAX_PAYLOAD_CANDIDATES {
            return None;
        }
        attempts += 1;
        parse_payload(candidate).filter(is_tool_payload)
    };

    for cap in JSON_FENCE_RE.captures_iter(text) {
        if let Some(body) = cap.get(1) {
            if let Some(obj) = try_candidate(body.as_str().trim()) {
                return Some(obj);
            }
        }
    }

    let mut open: Vec<usize> = Vec::new();
    let mut nested: Vec<(usize, usize)> = Vec::new();
    let mut in_string = false;
    let mut escape_next = false;

    for (i, c) in text.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match c {
            '\\' if in_string => escape_next = true,
            '"' if !open.is_empty() => in_string = !in_string,
            '{' if !in_string => open.push(i),
            '}' if !in_string => {
                let Some(start) = open.pop() else { continue };
                if !open.is_empty() {
                    if nested.len() < MAX_PAYLOAD_CANDIDATES {
                        nested.push((start, i));
                    }
                    continue;
                }
                if let Some(obj) = try_candidate(&text[start..=i]) {
                    return Some(obj);
                }
                nested.sort_by_key(|&(s, _)| s);
                for (s, e) in nested.drain(..) {
                    if let Some(obj) = try_candidate(&text[s..=e]) {
                        return Some(obj);
                    }
                }
            }
            _ => {}
        }
    }

    // 括号配对被裸引号打乱时，退而取首个 '{' 到最后一个 '}'
    match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if start < end => try_candidate(&text[start..=end]),
        _ => None,
    }
}

/// 解析单个候选：serde_json → 修复后 serde_json → json5
pub fn parse_payload(candidate: &str) -> Option<Map<String, Value>> {
    let as_object = |v: Value| match v {
        Value::Object(map) => Some(map),
        _ => None,
    };

    if let Ok(v) = serde_json::from_str::<Value>(candidate) {
        return as_object(v);
    }
    let sanitized = sanitize_json(candidate);
    if let Ok(v) = serde_json::from_str::<Value>(&sanitized) {
        return as_object(v);
    }
    json5::from_str::<Value>(&sanitized)
        .ok()
        .or_else(|| json5::from_str::<Value>(candidate).ok())
        .and_then(as_object)
}

/// 转义字符串值中的裸换行 / 制表符，以及不像结束引号的裸双引号
///
/// 一个引号只有在其后第一个非空白字符是 `, : } ]` 或文本结束时才被视为字符串结束。
pub fn sanitize_json(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len() + 16);
    let mut in_string = false;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if !in_string {
            if c == '"' {
                in_string = true;
            }
            out.push(c);
            i += 1;
            continue;
        }
        match c {
            '\\' => {
                out.push(c);
                if let Some(next) = chars.get(i + 1) {
                    out.push(*next);
                    i += 1;
                }
            }
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '"' => {
                let next = chars[i + 1..].iter().find(|ch| !ch.is_whitespace());
                if matches!(next, None | Some(',') | Some(':') | Some('}') | Some(']')) {
                    in_string = false;
                    out.push(c);
                } else {
                    out.push_str("\\\"");
                }
            }
            _ => out.push(c),
        }
        i += 1;
    }
    out
}

/// 参数可能是对象，也可能是 JSON 字符串（OpenAI function call 风格）
fn normalize_args(value: &Value) -> Value {
    match value {
        Value::String(s) => parse_payload(s)
            .map(Value::Object)
            .unwrap_or_else(|| value.clone()),
        Value::Null => Value::Object(Map::new()),
        other => other.clone(),
    }
}
