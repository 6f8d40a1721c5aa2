use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// 确认/删除消息所需的不透明凭证
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReceiptToken(String);

impl ReceiptToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReceiptToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 从队列收到的一条待处理消息
///
/// 由队列传输层创建，在一次处理尝试期间借给分发循环使用，
/// 确认（成功或死信之后）即生命周期结束。
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub id: String,
    /// 原始消息体，死信时原样转发
    pub body: Vec<u8>,
    pub receipt: ReceiptToken,
    /// FIFO分组键，传输层不支持分组时为空
    pub group_id: Option<String>,
    pub attributes: HashMap<String, String>,
}

impl Envelope {
    pub fn new(id: impl Into<String>, body: impl Into<Vec<u8>>, receipt: ReceiptToken) -> Self {
        Self {
            id: id.into(),
            body: body.into(),
            receipt,
            group_id: None,
            attributes: HashMap::new(),
        }
    }

    pub fn with_group_id(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_body_keeps_raw_bytes() {
        let envelope = Envelope::new("m1", vec![b'{', 0xff, 0xfe, b'}'], ReceiptToken::new("r1"));

        assert_eq!(envelope.body, vec![b'{', 0xff, 0xfe, b'}']);
        assert_eq!(Envelope::new("m2", "{}", ReceiptToken::new("r2")).body, b"{}");
    }
}
