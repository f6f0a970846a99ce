#![no_main]

use libfuzzer_sys::fuzz_target;
use vendorscope_daemon::protocol::{encode_response, parse_line};

fuzz_target!(|data: &[u8]| {
    let Ok(line) = std::str::from_utf8(data) else {
        return;
    };
    // 파싱 실패는 항상 JSON 한 줄의 에러 응답으로 변환되어야 함
    if let Err(response) = parse_line(line) {
        let encoded = encode_response(&response);
        assert!(!encoded.contains('\n'));
        let value: serde_json::Value = serde_json::from_str(&encoded).expect("valid JSON");
        assert_eq!(value["ok"], false);
    }
});
