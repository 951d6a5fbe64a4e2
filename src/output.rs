//! Result types returned by the pipelines.
//!
//! Field names on the wire follow the JSON shape downstream consumers of the
//! verification service already parse: `qwen_text`, `duration`, `concepts`
//! (keyed `姓名` / `签名一致`) and `raw`.

use serde::ser::Serializer;
use serde::Serialize;

/// Literal placed in the match list when no JSON object could be recovered.
pub const UNRECOGNIZED: &str = "unrecognized";

/// One entry of the signature-match list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchValue {
    /// The text model gave (or defaulted to) a verdict.
    Decided(bool),
    /// Nothing parseable came back; serialised as `"unrecognized"`.
    Unrecognized,
}

impl Serialize for MatchValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            MatchValue::Decided(b) => serializer.serialize_bool(*b),
            MatchValue::Unrecognized => serializer.serialize_str(UNRECOGNIZED),
        }
    }
}

/// The two semantic fields, each as a list: empty means absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Concepts {
    #[serde(rename = "姓名")]
    pub name: Vec<String>,
    #[serde(rename = "签名一致")]
    pub signature_match: Vec<MatchValue>,
}

impl Concepts {
    /// Sentinel for an extraction miss: no name, match = `["unrecognized"]`.
    pub fn unrecognized() -> Self {
        Self {
            name: Vec::new(),
            signature_match: vec![MatchValue::Unrecognized],
        }
    }

    pub fn is_unrecognized(&self) -> bool {
        self.signature_match == [MatchValue::Unrecognized]
    }
}

/// Output of the response extractor.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionResult {
    pub concepts: Concepts,
    /// The recovered object, or the raw completion text on a miss.
    pub raw: serde_json::Value,
    /// Name of the strategy that recovered the object.
    pub strategy: Option<&'static str>,
}

/// Result of the two-stage verification pipeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerificationOutput {
    /// Vision-stage transcription.
    #[serde(rename = "qwen_text")]
    pub vision_text: String,
    /// Vision-stage wall-clock seconds, rounded to milliseconds.
    pub duration: f64,
    pub concepts: Concepts,
    pub raw: serde_json::Value,
}

impl VerificationOutput {
    pub fn new(vision_text: String, duration: f64, extraction: ExtractionResult) -> Self {
        Self {
            vision_text,
            duration,
            concepts: extraction.concepts,
            raw: extraction.raw,
        }
    }
}

/// Result of the single-stage classification pipeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationOutput {
    /// Raw vision-stage text, returned verbatim.
    pub label: String,
    #[serde(skip)]
    pub duration: f64,
}

/// Envelope the classification endpoint has always answered with.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifyEnvelope {
    pub response_body: ClassifyBody,
    pub message: String,
    pub error_code: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifyBody {
    pub llm_result: Vec<String>,
    pub ocr_result: String,
}

impl From<ClassificationOutput> for ClassifyEnvelope {
    fn from(out: ClassificationOutput) -> Self {
        Self {
            response_body: ClassifyBody {
                llm_result: vec![out.label],
                ocr_result: String::new(),
            },
            message: "成功".to_string(),
            error_code: 0,
        }
    }
}
