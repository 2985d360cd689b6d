use proptest::prelude::*;
use sdk::errors::{EngineError, ErrorHint};
use sdk::types::{Message, MessageRole};

// Hints are static, user-safe strings: they never echo the detail text.
proptest! {
    #[test]
    fn test_error_user_hint_completeness(error_str in "[a-zA-Z0-9/_.-]{8,40}") {
        let errs = vec![
            EngineError::Config(error_str.clone()),
            EngineError::Secret(error_str.clone()),
            EngineError::Network(error_str.clone()),
            EngineError::Server(error_str.clone()),
            EngineError::SessionNotFound(error_str.clone()),
        ];

        for err in errs {
            let hint = err.user_hint();
            prop_assert!(!hint.is_empty());
            prop_assert!(!hint.contains(&error_str));
        }
    }
}

proptest! {
    #[test]
    fn test_message_json_roundtrip(
        role in prop_oneof![
            Just(MessageRole::System),
            Just(MessageRole::User),
            Just(MessageRole::Assistant),
        ],
        content in "\\PC*",
    ) {
        let msg = Message { role, content };
        let json = serde_json::to_string(&msg).expect("serialize");
        let parsed: Message = serde_json::from_str(&json).expect("deserialize");
        prop_assert_eq!(msg, parsed);
    }
}
