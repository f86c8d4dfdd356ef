//! 套餐额度规则

use serde::{Deserialize, Serialize};

use crate::user::Plan;

/// 单个套餐的消息额度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanLimits {
    /// 发送方对同一接收方可发送的消息条数
    pub allowance: u32,
    /// 单条消息的词数上限
    pub word_limit: u32,
    /// 是否允许视频通话
    pub video_call: bool,
}

impl PlanLimits {
    /// 已发送条数达到额度即拒绝（`>=`），额度 N 允许此前已有 N 条。
    pub fn allowance_exhausted(&self, sent_count: u64) -> bool {
        sent_count >= u64::from(self.allowance)
    }

    /// 词数达到上限即拒绝（`>=`），上限 20 时 20 个词的消息会被拒绝。
    pub fn word_limit_reached(&self, words: usize) -> bool {
        words as u64 >= u64::from(self.word_limit)
    }
}

/// 各套餐额度表
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanTable {
    pub freemium: PlanLimits,
    pub premium: PlanLimits,
    pub pro: PlanLimits,
}

impl PlanTable {
    pub fn limits(&self, plan: Plan) -> PlanLimits {
        match plan {
            Plan::Freemium => self.freemium,
            Plan::Premium => self.premium,
            Plan::Pro => self.pro,
        }
    }
}

impl Default for PlanTable {
    fn default() -> Self {
        Self {
            freemium: PlanLimits {
                allowance: 10,
                word_limit: 20,
                video_call: false,
            },
            premium: PlanLimits {
                allowance: 50,
                word_limit: 100,
                video_call: true,
            },
            pro: PlanLimits {
                allowance: 500,
                word_limit: 300,
                video_call: true,
            },
        }
    }
}

/// 按空白切分统计词数
pub fn word_count(body: &str) -> usize {
    body.split_whitespace().count()
}
