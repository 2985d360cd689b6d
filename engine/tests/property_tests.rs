use proptest::prelude::*;
use unihelp_engine::config::{Backend, Config};
use unihelp_engine::conversation::{bound, Conversation};
use unihelp_engine::knowledge::{KnowledgeContext, TRUNCATION_MARKER};
use unihelp_engine::llm::Message;

fn arb_turn() -> impl Strategy<Value = Message> {
    prop_oneof![
        "[a-z ]{0,12}".prop_map(|s| Message::user(s)),
        "[a-z ]{0,12}".prop_map(|s| Message::assistant(s)),
    ]
}

/// Conversation with or without a leading system message
fn arb_conversation() -> impl Strategy<Value = Vec<Message>> {
    (any::<bool>(), prop::collection::vec(arb_turn(), 0..30)).prop_map(|(system, turns)| {
        let mut messages = Vec::with_capacity(turns.len() + 1);
        if system {
            messages.push(Message::system("S"));
        }
        messages.extend(turns);
        messages
    })
}

proptest! {
    #[test]
    fn test_bound_is_idempotent(messages in arb_conversation(), window in 0usize..20) {
        let once = bound(&messages, window);
        prop_assert_eq!(bound(&once, window), once);
    }

    #[test]
    fn test_bound_is_identity_when_short(turns in prop::collection::vec(arb_turn(), 0..10), extra in 0usize..5) {
        let mut messages = vec![Message::system("S")];
        messages.extend(turns);
        let window = messages.len() - 1 + extra;
        prop_assert_eq!(bound(&messages, window), messages);
    }

    #[test]
    fn test_bound_keeps_system_and_suffix(messages in arb_conversation(), window in 0usize..20) {
        let bounded = bound(&messages, window);
        let has_system = messages.first().map(Message::is_system).unwrap_or(false);

        if has_system {
            prop_assert_eq!(&bounded[0], &messages[0]);
        }

        // Non-system part is an order-preserving suffix of the input
        let kept = &bounded[usize::from(has_system)..];
        prop_assert!(kept.len() <= window);
        prop_assert!(messages.ends_with(kept));
        prop_assert!(kept.iter().all(|m| !m.is_system()));
    }

    #[test]
    fn test_conversation_bound_in_place_agrees(turns in prop::collection::vec(arb_turn(), 0..30), window in 0usize..20) {
        let mut messages = vec![Message::system("S")];
        messages.extend(turns);

        let mut conv = Conversation::from_messages(messages.clone()).unwrap();
        conv.bound_in_place(window);
        let expected = bound(&messages, window);
        prop_assert_eq!(conv.messages(), expected.as_slice());
    }

    #[test]
    fn test_knowledge_truncation_length(text in "\\PC{0,200}", max_chars in 1usize..100) {
        let ctx = KnowledgeContext::from_text(text.clone(), max_chars);
        let original = text.chars().count();

        if original > max_chars {
            prop_assert!(ctx.is_truncated());
            let kept = ctx.text().strip_suffix(TRUNCATION_MARKER).unwrap();
            prop_assert_eq!(kept.chars().count(), max_chars);
            prop_assert!(text.starts_with(kept));
        } else {
            prop_assert!(!ctx.is_truncated());
            prop_assert_eq!(ctx.text(), text.as_str());
        }
    }

    #[test]
    fn test_config_parsing_round_trip(
        log_level in "error|warn|info|debug|trace",
        backend in prop_oneof![Just(Backend::Ollama), Just(Backend::Gemini)],
        history_window in 1usize..64,
        typing_delay_ms in 0u64..200,
        request_timeout_secs in 1u64..600,
        max_attempts in 1u32..5,
    ) {
        let mut config = Config::default();
        config.core.log_level = log_level;
        config.llm.backend = backend;
        config.chat.history_window = history_window;
        config.chat.typing_delay_ms = typing_delay_ms;
        config.llm.request_timeout_secs = request_timeout_secs;
        config.llm.max_attempts = max_attempts;

        let serialized = toml::to_string_pretty(&config).unwrap();
        let parsed = Config::from_toml_str(&serialized).unwrap();

        prop_assert_eq!(&parsed.core.log_level, &config.core.log_level);
        prop_assert_eq!(parsed.llm.backend, backend);
        prop_assert_eq!(parsed.chat.history_window, history_window);
        prop_assert_eq!(parsed.chat.typing_delay_ms, typing_delay_ms);
        prop_assert_eq!(parsed.llm.request_timeout_secs, request_timeout_secs);
        prop_assert_eq!(parsed.llm.max_attempts, max_attempts);
        prop_assert_eq!(parsed.active_model(), config.active_model());
    }
}
