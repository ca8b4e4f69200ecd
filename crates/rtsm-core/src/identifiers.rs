//! 标识符生成工具
//!
//! 受试者ID、站点内编号、药包编号与发货单编号的格式化与解析。
//! 序号的分配（读取当前最大值并自增）由存储层在事务内完成，
//! 本模块只负责纯粹的格式化与解析逻辑。

use uuid::Uuid;

/// 受试者ID前缀
pub const PATIENT_ID_PREFIX: &str = "PAT";

/// 药包编号前缀
pub const PACK_NUMBER_PREFIX: &str = "BYL";

/// 发货单编号前缀
pub const CONSIGNMENT_ID_PREFIX: &str = "CON-BYL";

/// 格式化受试者ID，如 PAT001
///
/// 补零只到3位；序号超过999时按完整数字输出，不截断。
pub fn format_patient_id(seq: u32) -> String {
    format!("{}{:03}", PATIENT_ID_PREFIX, seq)
}

/// 解析受试者ID的数字序号部分
pub fn parse_patient_seq(id: &str) -> Option<u32> {
    id.strip_prefix(PATIENT_ID_PREFIX)?.parse().ok()
}

/// 格式化站点内编号，如 S1001 (站点S1的第1位受试者)
pub fn format_display_name(site: &str, seq: u32) -> String {
    format!("{}{:03}", site, seq)
}

/// 解析站点内编号的数字序号部分
///
/// 编号不以该站点代码开头、或后缀不是纯数字时返回None，
/// 调用方应改用 [`fallback_display_name`] 生成唯一编号。
pub fn parse_display_suffix(site: &str, display_name: &str) -> Option<u32> {
    display_name.strip_prefix(site)?.parse().ok()
}

/// 命名规则不一致时的兜底编号，如 S1-3f9c02aa
pub fn fallback_display_name(site: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}", site, &suffix[..8])
}

/// 格式化药包编号，如 BYL001
pub fn format_pack_number(seq: u32) -> String {
    format!("{}{:03}", PACK_NUMBER_PREFIX, seq)
}

/// 格式化发货单编号，如 CON-BYL001
pub fn format_consignment_id(seq: u32) -> String {
    format!("{}{:03}", CONSIGNMENT_ID_PREFIX, seq)
}

/// 解析发货单编号的数字序号部分
pub fn parse_consignment_seq(id: &str) -> Option<u32> {
    id.strip_prefix(CONSIGNMENT_ID_PREFIX)?.parse().ok()
}

/// 当前最大序号的下一个值，无记录时从1开始
pub fn next_seq(current_max: Option<u32>) -> u32 {
    match current_max {
        Some(max) => max + 1,
        None => 1,
    }
}
