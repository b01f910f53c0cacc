//! 游标校验（validate_cursor）
//!
//! 阻塞查询的游标必须单调不减且至少为 1：
//! - 无法解析为整数时返回 `None`；
//! - 相比上一个游标发生回退时视为全量重置；
//! - 结果最小钳制到 1。
//!
use serde_json::Value;

/// 最小合法游标
pub const MIN_CURSOR: u64 = 1;

/// 校验并归一化游标，`prev` 为上一次的合法游标
pub fn validate_cursor(current: &Value, prev: Option<u64>) -> Option<u64> {
    let parsed = match current {
        Value::Number(n) => n
            .as_i64()
            .map(i128::from)
            .or_else(|| n.as_u64().map(i128::from))
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i128)),
        Value::String(s) => parse_leading_int(s),
        _ => None,
    }?;

    let cursor = match prev {
        Some(prev) if parsed < i128::from(prev) => 0,
        _ => parsed,
    };
    Some(cursor.clamp(i128::from(MIN_CURSOR), i128::from(u64::MAX)) as u64)
}

// 与宽松的整数解析一致：忽略前导空白，读取可选符号与连续数字，其后内容忽略
fn parse_leading_int(s: &str) -> Option<i128> {
    let s = s.trim_start();
    let (negative, rest) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };
    let digits: &str = &rest[..rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len())];
    if digits.is_empty() {
        return None;
    }
    // 超长数字串按上限处理，避免溢出
    let value = digits.parse::<i128>().unwrap_or(i128::MAX);
    Some(if negative { -value } else { value })
}
