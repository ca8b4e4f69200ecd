//! 随机化选包策略
//!
//! 随机源作为可注入能力，生产环境使用无种子的均匀随机选择，
//! 测试环境可替换为确定性实现。

use rand::seq::SliceRandom;
use rtsm_core::Pack;

/// 选包策略接口
pub trait PackSelector: Send + Sync {
    /// 从候选药包中选出一个；候选为空时返回None
    fn select<'a>(&self, packs: &'a [Pack]) -> Option<&'a Pack>;
}

/// 均匀随机选包（生产默认）
///
/// 每次调用使用新的随机源，不要求可复现。
#[derive(Debug, Default)]
pub struct UniformSelector;

impl PackSelector for UniformSelector {
    fn select<'a>(&self, packs: &'a [Pack]) -> Option<&'a Pack> {
        packs.choose(&mut rand::thread_rng())
    }
}

/// 取第一个可用药包（测试用确定性实现）
#[derive(Debug, Default)]
pub struct FirstAvailableSelector;

impl PackSelector for FirstAvailableSelector {
    fn select<'a>(&self, packs: &'a [Pack]) -> Option<&'a Pack> {
        packs.first()
    }
}
