//! Symposium Test Utilities
//!
//! Centralized test infrastructure for the Symposium workspace:
//! - Paper fixtures for common scenarios
//! - Pre-seeded stores and coordinators
//! - Proptest generators for domain types

use std::sync::Arc;

use symposium_agents::{AgentRegistry, Coordinator, InMemoryPaperStore};
use symposium_core::{EngineConfig, PaperRecord};
use symposium_llm::{MockModelBackend, ModelBackend};

// ============================================================================
// PAPER FIXTURES
// ============================================================================

pub fn attention_paper() -> PaperRecord {
    PaperRecord::new(
        "1706.03762",
        "Attention Is All You Need",
        "We propose the Transformer, a model architecture relying entirely on \
         attention mechanisms, dispensing with recurrence and convolutions.",
    )
    .with_authors(vec![
        "Ashish Vaswani".to_string(),
        "Noam Shazeer".to_string(),
    ])
    .with_categories(vec!["cs.CL".to_string(), "cs.LG".to_string()])
}

pub fn bert_paper() -> PaperRecord {
    PaperRecord::new(
        "1810.04805",
        "BERT: Pre-training of Deep Bidirectional Transformers",
        "We introduce BERT, designed to pre-train deep bidirectional \
         representations from unlabeled text.",
    )
    .with_authors(vec!["Jacob Devlin".to_string()])
    .with_categories(vec!["cs.CL".to_string()])
}

pub fn resnet_paper() -> PaperRecord {
    PaperRecord::new(
        "1512.03385",
        "Deep Residual Learning for Image Recognition",
        "We present a residual learning framework to ease the training of \
         networks that are substantially deeper than those used previously.",
    )
    .with_categories(vec!["cs.CV".to_string()])
}

pub fn gan_paper() -> PaperRecord {
    PaperRecord::new(
        "1406.2661",
        "Generative Adversarial Networks",
        "We propose a new framework for estimating generative models via an \
         adversarial process.",
    )
    .with_categories(vec!["stat.ML".to_string()])
}

/// A paper that fails agent creation: empty abstract.
pub fn invalid_paper() -> PaperRecord {
    PaperRecord::new("0000.00000", "Empty Paper", "")
}

/// All valid fixture papers.
pub fn fixture_papers() -> Vec<PaperRecord> {
    vec![attention_paper(), bert_paper(), resnet_paper(), gan_paper()]
}

/// A store pre-seeded with the fixture papers.
pub fn seeded_store() -> Arc<InMemoryPaperStore> {
    let store = InMemoryPaperStore::new();
    for paper in fixture_papers() {
        store.insert(paper);
    }
    Arc::new(store)
}

// ============================================================================
// ENGINE FIXTURES
// ============================================================================

/// Engine config with short deadlines suitable for tests.
pub fn test_config() -> EngineConfig {
    EngineConfig {
        turn_deadline_ms: 5_000,
        rate_limit_retry_cap_ms: 50,
        ..EngineConfig::default()
    }
}

/// Coordinator over the seeded store and the given backend.
pub fn test_coordinator(backend: Arc<dyn ModelBackend>) -> Coordinator {
    let registry = Arc::new(AgentRegistry::new(test_config().max_active_agents));
    Coordinator::new(registry, seeded_store(), backend, test_config())
}

/// Coordinator over the seeded store with the deterministic mock backend.
pub fn mock_coordinator() -> Coordinator {
    test_coordinator(Arc::new(MockModelBackend::new()))
}

// ============================================================================
// GENERATORS
// ============================================================================

pub mod generators {
    use proptest::prelude::*;
    use symposium_core::{
        ConversationPhase, ConversationType, DebateContext, EntryRole, EnvelopeKind, PaperRecord,
    };

    pub fn arb_conversation_type() -> impl Strategy<Value = ConversationType> {
        prop_oneof![
            Just(ConversationType::Collaboration),
            Just(ConversationType::Comparison),
            Just(ConversationType::Synthesis),
            Just(ConversationType::Debate),
        ]
    }

    pub fn arb_conversation_phase() -> impl Strategy<Value = ConversationPhase> {
        prop_oneof![
            Just(ConversationPhase::Created),
            Just(ConversationPhase::Active),
            Just(ConversationPhase::Closed),
        ]
    }

    pub fn arb_debate_context() -> impl Strategy<Value = DebateContext> {
        prop_oneof![
            Just(DebateContext::PriorRound),
            Just(DebateContext::AllRounds),
        ]
    }

    pub fn arb_envelope_kind() -> impl Strategy<Value = EnvelopeKind> {
        prop_oneof![
            Just(EnvelopeKind::Initialize),
            Just(EnvelopeKind::Request),
            Just(EnvelopeKind::Response),
            Just(EnvelopeKind::Notification),
            Just(EnvelopeKind::Error),
        ]
    }

    pub fn arb_entry_role() -> impl Strategy<Value = EntryRole> {
        prop_oneof![
            Just(EntryRole::System),
            Just(EntryRole::User),
            Just(EntryRole::Agents),
        ]
    }

    pub fn arb_topic() -> impl Strategy<Value = String> {
        proptest::string::string_regex("[a-z]{3,12}( [a-z]{3,12}){0,4}")
            .expect("valid topic regex")
    }

    /// Between 2 and 5 distinct paper IDs.
    pub fn arb_participant_ids() -> impl Strategy<Value = Vec<String>> {
        proptest::collection::hash_set("[a-z0-9]{4,10}", 2..=5)
            .prop_map(|set| set.into_iter().collect())
    }

    pub fn arb_paper_record() -> impl Strategy<Value = PaperRecord> {
        (
            "[0-9]{4}\\.[0-9]{5}",
            "[A-Za-z ]{5,40}",
            "[A-Za-z ,.]{20,200}",
        )
            .prop_map(|(id, title, abstract_text)| PaperRecord::new(id, title, abstract_text))
    }
}
