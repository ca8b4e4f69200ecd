//! 药包供应规划
//!
//! 试验开始前的一次性步骤：按数量与类型分界生成全部药包，
//! 初始位置为药库，状态为可用。实际写入由存储层批量完成。

use rtsm_core::{identifiers, NewPack, PackStatus, Result, RtsmError, DEPOT_LOCATION};

/// 类型分界：从 `start_seq` 号开始使用 `pack_type`
#[derive(Debug, Clone)]
pub struct TypeBoundary {
    pub start_seq: u32,
    pub pack_type: String,
}

impl TypeBoundary {
    pub fn new(start_seq: u32, pack_type: &str) -> Self {
        Self {
            start_seq,
            pack_type: pack_type.to_string(),
        }
    }
}

/// 生成供应计划：BYL001..BYL{count}，类型按分界切换
pub fn plan_provisioning(count: u32, boundaries: &[TypeBoundary]) -> Result<Vec<NewPack>> {
    if count == 0 {
        return Err(RtsmError::Validation("Pack count must be positive".into()));
    }
    match boundaries.first() {
        Some(first) if first.start_seq == 1 => {}
        _ => {
            return Err(RtsmError::Validation(
                "Type boundaries must start at pack 1".into(),
            ))
        }
    }
    if boundaries.windows(2).any(|w| w[0].start_seq >= w[1].start_seq) {
        return Err(RtsmError::Validation(
            "Type boundaries must be strictly increasing".into(),
        ));
    }

    let mut packs = Vec::with_capacity(count as usize);
    for seq in 1..=count {
        let pack_type = boundaries
            .iter()
            .rev()
            .find(|b| b.start_seq <= seq)
            .map(|b| b.pack_type.clone())
            .unwrap_or_default();
        packs.push(NewPack {
            pack_number: identifiers::format_pack_number(seq),
            pack_type,
            location: DEPOT_LOCATION.to_string(),
            status: PackStatus::Available,
        });
    }
    Ok(packs)
}
