//! 订单号校验
//!
//! 订单号与扣减流水号共用同一规则：纯数字且通过 Luhn 校验。

/// 校验订单号
///
/// 空串、含非数字字符（包括空白与符号）一律返回 false。
pub fn is_valid(order_id: &str) -> bool {
    if order_id.is_empty() {
        return false;
    }

    // 只保留模 10 的余数，任意长度输入都不会溢出
    let mut sum: u32 = 0;
    for (i, c) in order_id.chars().rev().enumerate() {
        let Some(digit) = c.to_digit(10) else {
            return false;
        };
        // 从右数第 2、4、6... 位翻倍，超过 9 减 9
        let value = if i % 2 == 1 {
            let doubled = digit * 2;
            if doubled > 9 { doubled - 9 } else { doubled }
        } else {
            digit
        };
        sum = (sum + value) % 10;
    }

    sum == 0
}
