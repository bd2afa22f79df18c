//! 文本清洗 - 去除标记、按码点截断、转义通知守护进程的标记字符
//!
//! 处理顺序：
//! 1. `strip_markup` 把消息 HTML 转成纯文本
//! 2. `truncate` 按 Unicode 码点截断，超长时保留 budget-2 个字符并追加 ".."
//! 3. `escape_markup` 转义 `& < > " '`
//!
//! `sanitize` 把 2、3 合在一起：截断点按转义后的宽度选取，实体不会被截断，
//! 结果不超过 budget 个码点。

use regex::Regex;
use std::sync::LazyLock;

/// 截断后追加的省略标记
pub const ELLIPSIS: &str = "..";

static BREAK_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<\s*(br|/p|/div)\s*/?\s*>").expect("valid regex"));

static ANY_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]*>").expect("valid regex"));

static ENTITY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"&(#[0-9]+|#[xX][0-9a-fA-F]+|[a-zA-Z]+);").expect("valid regex"));

/// 去除消息中的 HTML 标记，换行标签转为 `\n`，解码常见实体
pub fn strip_markup(raw: &str) -> String {
    let text = BREAK_TAG.replace_all(raw, "\n");
    let text = ANY_TAG.replace_all(&text, "");
    let text = ENTITY.replace_all(&text, |caps: &regex::Captures| {
        decode_entity(&caps[1]).unwrap_or_else(|| caps[0].to_string())
    });
    text.trim().to_string()
}

fn decode_entity(name: &str) -> Option<String> {
    let decoded = match name {
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "apos" => '\'',
        "nbsp" => ' ',
        _ => {
            let code = if let Some(hex) = name.strip_prefix("#x").or_else(|| name.strip_prefix("#X")) {
                u32::from_str_radix(hex, 16).ok()?
            } else {
                name.strip_prefix('#')?.parse::<u32>().ok()?
            };
            char::from_u32(code)?
        }
    };
    Some(decoded.to_string())
}

/// 按码点截断
///
/// 长度 <= budget 原样返回；否则保留前 budget-2 个码点并追加 ".."。
/// budget <= 2 时结果就是 ".."。
pub fn truncate(text: &str, budget: usize) -> String {
    if text.chars().count() <= budget {
        return text.to_string();
    }
    let keep = budget.saturating_sub(ELLIPSIS.len());
    let mut out: String = text.chars().take(keep).collect();
    out.push_str(ELLIPSIS);
    out
}

fn entity_for(c: char) -> Option<&'static str> {
    match c {
        '&' => Some("&amp;"),
        '<' => Some("&lt;"),
        '>' => Some("&gt;"),
        '"' => Some("&quot;"),
        '\'' => Some("&apos;"),
        _ => None,
    }
}

/// 转义通知标记方言中的不安全字符
pub fn escape_markup(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match entity_for(c) {
            Some(entity) => out.push_str(entity),
            None => out.push(c),
        }
    }
    out
}

/// 截断并转义（输入应已去除标记）
///
/// 结果最多 budget 个码点，转义产生的实体计入长度且不会被截断；
/// budget < 2 时结果固定为 ".."。
pub fn sanitize(plain: &str, budget: usize) -> String {
    if budget < ELLIPSIS.len() {
        return ELLIPSIS.to_string();
    }

    let escaped = escape_markup(plain);
    if escaped.chars().count() <= budget {
        return escaped;
    }

    let room = budget - ELLIPSIS.len();
    let mut out = String::new();
    let mut width = 0;
    for c in plain.chars() {
        let entity = entity_for(c);
        let w = entity.map_or(1, str::len);
        if width + w > room {
            break;
        }
        match entity {
            Some(entity) => out.push_str(entity),
            None => out.push(c),
        }
        width += w;
    }
    out.push_str(ELLIPSIS);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_text_unchanged() {
        assert_eq!(truncate("hello", 60), "hello");
        assert_eq!(truncate("", 60), "");
    }

    #[test]
    fn test_truncate_at_budget() {
        let body = "x".repeat(70);
        let out = truncate(&body, 60);
        assert_eq!(out, format!("{}..", "x".repeat(58)));
        assert_eq!(out.chars().count(), 60);

        // 恰好等于 budget 不截断
        let exact = "y".repeat(60);
        assert_eq!(truncate(&exact, 60), exact);
    }

    #[test]
    fn test_truncate_counts_code_points() {
        // 每个汉字 3 字节，按字节截断会落在字符中间
        let body = "你好世界你好世界";
        assert_eq!(truncate(body, 6), "你好世界..");

        let emoji = "😀😀😀😀😀";
        assert_eq!(truncate(emoji, 4), "😀😀..");
    }

    #[test]
    fn test_tiny_budget_yields_ellipsis() {
        assert_eq!(truncate("abcdef", 2), "..");
        assert_eq!(truncate("abcdef", 1), "..");
        assert_eq!(truncate("abcdef", 0), "..");
    }

    #[test]
    fn test_budget_respected_for_all_lengths() {
        let text = "ab€dé😀ghij";
        for budget in 2..15 {
            assert!(truncate(text, budget).chars().count() <= budget, "budget {}", budget);
        }
    }

    #[test]
    fn test_escape_markup() {
        assert_eq!(escape_markup("a < b & c > d"), "a &lt; b &amp; c &gt; d");
        assert_eq!(escape_markup("plain"), "plain");
    }

    #[test]
    fn test_sanitize_counts_entities_against_budget() {
        assert_eq!(sanitize("<<<<<", 4), "..");
        assert_eq!(sanitize("<<<<<", 10), "&lt;&lt;..");
        assert_eq!(sanitize("a<b", 6), "a&lt;b");
        assert_eq!(sanitize("a<bcd", 6), "a..");

        let out = sanitize(&"&".repeat(60), 60);
        assert_eq!(out, format!("{}..", "&amp;".repeat(11)));
    }

    #[test]
    fn test_sanitize_tiny_budget() {
        assert_eq!(sanitize("a", 1), "..");
        assert_eq!(sanitize("", 0), "..");
        assert_eq!(sanitize("abc", 2), "..");
        assert_eq!(sanitize("ab", 2), "ab");
    }

    /// 每个 '&' 都必须是完整实体的开头
    fn entities_intact(out: &str) -> bool {
        const ENTITIES: [&str; 5] = ["&amp;", "&lt;", "&gt;", "&quot;", "&apos;"];
        out.match_indices('&')
            .all(|(i, _)| ENTITIES.iter().any(|e| out[i..].starts_with(e)))
    }

    #[test]
    fn test_sanitize_budget_respected_for_all_inputs() {
        let inputs = [
            String::new(),
            "plain words".to_string(),
            "x".repeat(70),
            "&".repeat(60),
            "<b>&'\"".repeat(12),
            "你好 <世界> & 😀 'quoted' \"double\"".to_string(),
            "a&b<c>d\"e'f".repeat(5),
        ];
        for input in &inputs {
            for budget in 0..40 {
                let out = sanitize(input, budget);
                if budget < 2 {
                    assert_eq!(out, "..", "input {:?} budget {}", input, budget);
                    continue;
                }
                assert!(
                    out.chars().count() <= budget,
                    "input {:?} budget {} gave {} code points",
                    input,
                    budget,
                    out.chars().count()
                );
                assert!(entities_intact(&out), "entity cut in {:?}", out);
            }
        }
    }

    #[test]
    fn test_strip_markup() {
        assert_eq!(strip_markup("<b>hi</b> <i>there</i>"), "hi there");
        assert_eq!(strip_markup("line1<br>line2<BR/>line3"), "line1\nline2\nline3");
        assert_eq!(strip_markup("fish &amp; chips &lt;3"), "fish & chips <3");
        assert_eq!(strip_markup("&#65;&#x42;"), "AB");
        assert_eq!(strip_markup("&bogus; stays"), "&bogus; stays");
        assert_eq!(
            strip_markup(r#"<font color="red">warn</font>"#),
            "warn"
        );
    }
}
