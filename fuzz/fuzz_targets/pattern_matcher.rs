#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

use vendorscope_detector::rule::PatternKind;
use vendorscope_detector::{Pattern, PatternMatcher};

/// 퍼저용 구조적 입력
#[derive(Arbitrary, Debug)]
struct FuzzInput {
    kind: FuzzKind,
    source: String,
    flags: String,
    /// 매칭 대상 값 (최대 8개)
    values: Vec<String>,
}

#[derive(Arbitrary, Debug)]
enum FuzzKind {
    Literal,
    Wildcard,
    Regex,
    Classify,
}

fuzz_target!(|input: FuzzInput| {
    let pattern = match input.kind {
        FuzzKind::Literal => Pattern::compile(PatternKind::Literal, &input.source, ""),
        FuzzKind::Wildcard => Pattern::compile(PatternKind::Wildcard, &input.source, ""),
        FuzzKind::Regex => Pattern::compile(PatternKind::Regex, &input.source, &input.flags),
        FuzzKind::Classify => Pattern::classify(&input.source),
    };

    // 잘못된 정규식도 패닉 없이 degraded 패턴이 되어야 함
    for value in input.values.iter().take(8) {
        let direct = pattern.matches(value);
        assert_eq!(direct, PatternMatcher::matches(value, &pattern));
    }

    // 리터럴은 대소문자를 구분하지 않는 부분 문자열 매칭
    if matches!(input.kind, FuzzKind::Literal) && !pattern.is_degraded() {
        assert!(pattern.matches(&input.source));
    }
});
