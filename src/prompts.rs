//! Prompts for the vision and extraction stages.
//!
//! The classification label set lives entirely in
//! [`DEFAULT_CLASSIFY_PROMPT`]; no code enumerates the labels, so adding a
//! document type is a prompt change only.
//!
//! Callers can override the vision prompts through
//! [`crate::config::PipelineConfig::prompt`]. The extraction instruction is
//! fixed because [`crate::pipeline::extract`] depends on its key names.

/// Default vision prompt for ID card + handwritten signature verification.
pub const DEFAULT_VERIFY_PROMPT: &str = "这两张图分别为身份证与手写签名。请先准确识别并输出两图的文本内容，\
尤其是身份证上的姓名原文和手写签名的逐字转写；不要编造。如签名过于模糊或潦草无法辨认请明确说明。\
依据规则：若签名可读内容与身份证姓名的相似度低于80%则判为不一致；若无法判断也视为不一致。";

/// Default prompt for classifying document images.
pub const DEFAULT_CLASSIFY_PROMPT: &str = "对图片进行分类，类型有\"身份证正面\"，\"身份证反面\"，\
\"出生医学证明\"，\"常驻人口登记卡\"，\"居民户口簿信息\"，如果不是以上类型，请返回\"未分类\"，仅返回上述分类结果";

/// Schema directive prepended to the vision transcription.
pub const EXTRACTION_DIRECTIVE: &str = "仅返回JSON，包含键：姓名(string)、签名一致(boolean)、理由(string)。\
如果无法判断签名一致，则将签名一致设为false。";

/// Build the second-stage instruction embedding the vision stage's output.
pub fn extraction_instruction(vision_text: &str) -> String {
    format!("{EXTRACTION_DIRECTIVE}识别文本如下：\n{vision_text}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::extract::{MATCH_KEYS, NAME_KEYS};

    #[test]
    fn instruction_embeds_vision_text_last() {
        let s = extraction_instruction("身份证姓名：张三");
        assert!(s.starts_with(EXTRACTION_DIRECTIVE));
        assert!(s.ends_with("识别文本如下：\n身份证姓名：张三"));
    }

    #[test]
    fn directive_names_the_keys_the_extractor_reads() {
        assert!(EXTRACTION_DIRECTIVE.contains(NAME_KEYS[0]));
        assert!(EXTRACTION_DIRECTIVE.contains(MATCH_KEYS[0]));
    }

    #[test]
    fn classify_prompt_lists_fallback_label() {
        assert!(DEFAULT_CLASSIFY_PROMPT.contains("未分类"));
    }
}
