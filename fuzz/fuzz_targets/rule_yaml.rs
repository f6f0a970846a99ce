#![no_main]

use libfuzzer_sys::fuzz_target;
use vendorscope_detector::RuleLoader;
use vendorscope_detector::rule::RuleDefinition;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(parsed) = RuleLoader::parse_documents(text, "fuzz-input.yml") else {
        return;
    };

    // 컴파일된 문서는 JSON으로 직렬화/역직렬화되어도 같은 규칙이어야 함
    for doc in &parsed.documents {
        let Ok(rule) = doc.compile() else {
            continue;
        };
        let json = serde_json::to_string(&rule).expect("rule serializes");
        let back: RuleDefinition = serde_json::from_str(&json).expect("rule deserializes");
        assert_eq!(back.id, rule.id);
    }

    // 잘못된 문서와 중복은 건너뛰므로 결과가 입력보다 많을 수 없음
    if let Ok(compiled) = RuleLoader::compile_documents(&parsed.documents, "fuzz-input.yml") {
        assert!(compiled.len() <= parsed.documents.len());
    }
});
