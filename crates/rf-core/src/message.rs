//! Control-plane wire documents
//!
//! Inbound: one JSON configuration document per message. Parsing is
//! tolerant by contract: unknown fields are ignored, omitted fields fall
//! back to the documented defaults, string enums are matched
//! case-insensitively and unknown values select the documented fallback.
//!
//! Outbound: the `PsdResult` document, always scaled in dBm.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{DesiredConfig, FilterRange, PsdMethod, RfMode, RfResult, WindowType};

fn str_field<'a>(doc: &'a Value, key: &str) -> Option<&'a str> {
    doc.get(key).and_then(Value::as_str)
}

fn f64_field(doc: &Value, key: &str) -> Option<f64> {
    doc.get(key).and_then(Value::as_f64)
}

fn u64_field(doc: &Value, key: &str) -> Option<u64> {
    doc.get(key).and_then(Value::as_u64)
}

fn i64_field(doc: &Value, key: &str) -> Option<i64> {
    doc.get(key).and_then(Value::as_i64)
}

fn bool_field(doc: &Value, key: &str) -> Option<bool> {
    doc.get(key).and_then(Value::as_bool)
}

/// Parses one inbound configuration document into a validated
/// `DesiredConfig`. The filter range, when present, is clipped to the
/// captured span before being stored.
pub fn parse_desired_config(json: &str) -> RfResult<DesiredConfig> {
    let doc: Value = serde_json::from_str(json)?;

    let mut cfg = DesiredConfig::default();

    if let Some(mode) = str_field(&doc, "rf_mode") {
        cfg.mode = RfMode::from_name(mode);
    }
    if let Some(method) = str_field(&doc, "method_psd") {
        cfg.psd_method = PsdMethod::from_name(method);
    }
    if let Some(window) = str_field(&doc, "window") {
        cfg.window_type = WindowType::from_name(window);
    }

    if let Some(freq) = u64_field(&doc, "center_freq_hz") {
        cfg.center_freq_hz = freq;
    }
    if let Some(fs) = f64_field(&doc, "sample_rate_hz") {
        if fs > 0.0 {
            cfg.sample_rate_hz = fs;
        }
    }
    if let Some(rbw) = u64_field(&doc, "rbw_hz") {
        cfg.rbw_hz = rbw.min(u32::MAX as u64) as u32;
    }
    if let Some(overlap) = f64_field(&doc, "overlap") {
        cfg.overlap = overlap.clamp(0.0, 1.0);
    }
    if let Some(gain) = i64_field(&doc, "lna_gain") {
        cfg.lna_gain = gain as i32;
    }
    if let Some(gain) = i64_field(&doc, "vga_gain") {
        cfg.vga_gain = gain as i32;
    }
    if let Some(amp) = bool_field(&doc, "antenna_amp") {
        cfg.amp_enabled = amp;
    }
    if let Some(port) = u64_field(&doc, "antenna_port") {
        cfg.antenna_port = port.min(u8::MAX as u64) as u8;
    }
    if let Some(ppm) = i64_field(&doc, "ppm_error") {
        cfg.ppm_error = ppm as i32;
    }

    if let Some(filter) = doc.get("filter").filter(|f| f.is_object()) {
        let start = u64_field(filter, "start_freq_hz");
        let end = u64_field(filter, "end_freq_hz");
        if let (Some(start_freq_hz), Some(end_freq_hz)) = (start, end) {
            let range = FilterRange {
                start_freq_hz,
                end_freq_hz,
            };
            cfg.filter_range = Some(range.clipped_to_span(cfg.center_freq_hz, cfg.sample_rate_hz));
            cfg.filter_enabled = true;
        }
    }

    Ok(cfg)
}

/// Outbound result document: one PSD sweep, plus the demodulation metric
/// of the active mode when one is running.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PsdResult {
    pub start_freq_hz: u64,
    pub end_freq_hz: u64,
    /// FM peak-deviation EMA in Hz; present only in FM mode.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub excursion_hz: Option<f64>,
    /// AM modulation depth in percent; present only in AM mode.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub depth: Option<f64>,
    #[serde(rename = "Pxx")]
    pub pxx: Vec<f64>,
}

impl PsdResult {
    pub fn new(start_freq_hz: u64, end_freq_hz: u64, pxx: Vec<f64>) -> Self {
        Self {
            start_freq_hz,
            end_freq_hz,
            excursion_hz: None,
            depth: None,
            pxx,
        }
    }

    /// Compact single-line JSON, ready for the control plane.
    pub fn to_json(&self) -> RfResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCENARIO_1: &str = r#"{"rf_mode":"psd","center_freq_hz":100000000,
        "sample_rate_hz":2000000,"rbw_hz":10000,"overlap":0.5,"window":"hann",
        "lna_gain":16,"vga_gain":20,"antenna_amp":false,"antenna_port":1}"#;

    #[test]
    fn test_parse_scenario_config() {
        let cfg = parse_desired_config(SCENARIO_1).unwrap();
        assert_eq!(cfg.mode, RfMode::Psd);
        assert_eq!(cfg.center_freq_hz, 100_000_000);
        assert_eq!(cfg.sample_rate_hz, 2_000_000.0);
        assert_eq!(cfg.rbw_hz, 10_000);
        assert_eq!(cfg.window_type, WindowType::Hann);
        assert!(!cfg.amp_enabled);
        assert!(!cfg.filter_enabled);
    }

    #[test]
    fn test_parse_defaults_when_omitted() {
        let cfg = parse_desired_config("{}").unwrap();
        assert_eq!(cfg, DesiredConfig::default());
    }

    #[test]
    fn test_parse_case_insensitive_strings() {
        let cfg =
            parse_desired_config(r#"{"rf_mode":"FM","method_psd":"PFB","window":"BLACKMAN"}"#)
                .unwrap();
        assert_eq!(cfg.mode, RfMode::Fm);
        assert_eq!(cfg.psd_method, PsdMethod::Pfb);
        assert_eq!(cfg.window_type, WindowType::Blackman);
    }

    #[test]
    fn test_parse_unknown_strings_fall_back() {
        let cfg =
            parse_desired_config(r#"{"rf_mode":"chirp","method_psd":"music","window":"lanczos"}"#)
                .unwrap();
        assert_eq!(cfg.mode, RfMode::Psd);
        assert_eq!(cfg.psd_method, PsdMethod::Welch);
        assert_eq!(cfg.window_type, WindowType::Hamming);
    }

    #[test]
    fn test_parse_filter_clipped() {
        let cfg = parse_desired_config(
            r#"{"center_freq_hz":100000000,"sample_rate_hz":2000000,
                "filter":{"start_freq_hz":98500000,"end_freq_hz":101500000}}"#,
        )
        .unwrap();
        let range = cfg.filter_range.unwrap();
        assert!(cfg.filter_enabled);
        assert_eq!(range.start_freq_hz, 99_000_000);
        assert_eq!(range.end_freq_hz, 101_000_000);
    }

    #[test]
    fn test_parse_malformed_is_error() {
        assert!(parse_desired_config("{not json").is_err());
    }

    #[test]
    fn test_result_serialization_psd_only() {
        let result = PsdResult::new(97_000_000, 99_000_000, vec![-98.3, -97.1]);
        let json = result.to_json().unwrap();
        assert!(json.contains("\"Pxx\":[-98.3,-97.1]"));
        assert!(!json.contains("excursion_hz"));
        assert!(!json.contains("depth"));
    }

    #[test]
    fn test_result_serialization_with_metric() {
        let mut result = PsdResult::new(0, 1, vec![-10.0]);
        result.excursion_hz = Some(38_214.5);
        let json = result.to_json().unwrap();
        assert!(json.contains("\"excursion_hz\":38214.5"));
    }
}
