use proptest::prelude::*;

/// Dotted message type such as `build.request` or `hooks.execute`
pub fn message_type_strategy() -> impl Strategy<Value = String> {
    "[a-z]{1,8}(\\.[a-z]{1,8}){0,2}"
}

/// A lowercase segment usable as a type prefix
pub fn segment_strategy() -> impl Strategy<Value = String> {
    "[a-z]{1,8}"
}

/// Route pattern in any of the string forms: exact, `prefix.` or glob
pub fn route_pattern_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        message_type_strategy(),
        segment_strategy().prop_map(|segment| format!("{segment}.")),
        segment_strategy().prop_map(|segment| format!("{segment}.*")),
        Just("*".to_string()),
    ]
}

/// Top-level keys a producer might flatten into an envelope
pub fn payload_key_strategy() -> impl Strategy<Value = String> {
    "[a-z_]{1,12}"
}
