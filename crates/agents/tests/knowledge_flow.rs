//! Integration tests for ingest and chat
//!
//! Note: Tests that require a model provider are marked with #[ignore]
//! Run them with: cargo test -- --ignored

mod common;

use agentdesk_agents::answerer::{DECLINE_RESPONSE, NO_KNOWLEDGE_BASE_RESPONSE};
use agentdesk_agents::{
    AgentError, Answer, AnswererState, DocumentStatus, Embedder, InvalidationPolicy,
    RetrievalAnswerer,
};
use agentdesk_core::{ChatRole, ChatTurn};
use agentdesk_db::{DbError, IndexStore};
use async_trait::async_trait;
use common::{broken_document, context_for, document, filler, Harness, OCR_TEXT};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Two documents of 7 and 5 chunks, then a grounded answer
#[tokio::test]
async fn test_ingest_then_chat() {
    let h = Harness::new(InvalidationPolicy::Uploader).await;
    h.add_agent("hr").await;

    // 5500 and 4000 characters, plus the trailing page newline
    let docs = vec![
        document("handbook.pdf", &[filler(5500)]),
        document("contract.pdf", &[filler(4000)]),
    ];
    let report = h
        .service
        .ingest("hr", "alice", &docs)
        .await
        .expect("Failed to ingest");

    assert_eq!(report.chunks_added, 12);
    assert_eq!(report.total_chunks, 12);
    assert_eq!(report.location.generation, 1);
    assert_eq!(
        report.documents[0].status,
        DocumentStatus::Indexed { chunks: 7 }
    );
    assert_eq!(
        report.documents[1].status,
        DocumentStatus::Indexed { chunks: 5 }
    );
    assert_eq!(h.ocr.calls(), 0);

    let agent = h.repo.get_agent("hr").await.unwrap().unwrap();
    assert_eq!(agent.vector_index_path, Some(report.location.path.clone()));

    let outcome = h
        .service
        .chat("hr", "alice", "How much notice is required?", Vec::new())
        .await
        .expect("Failed to chat");

    assert_eq!(
        outcome.answer,
        Answer::Grounded("14 days notice required for termination.".into())
    );
    assert_eq!(
        outcome.history,
        vec![
            ChatTurn::user("How much notice is required?"),
            ChatTurn::assistant("14 days notice required for termination."),
        ]
    );

    let request = h.model.last_request().expect("Model was not called");
    assert_eq!(request.context.len(), 3);
    assert_eq!(request.query, "How much notice is required?");
    assert_eq!(request.tools.len(), 1);
    assert_eq!(request.tools[0].name, "file_reader");
}

#[tokio::test]
async fn test_chat_without_index() {
    let h = Harness::new(InvalidationPolicy::Uploader).await;
    h.add_agent("support").await;

    let history = vec![ChatTurn::user("hi"), ChatTurn::assistant("hello")];
    let outcome = h
        .service
        .chat("support", "bob", "What is the refund policy?", history)
        .await
        .unwrap();

    assert_eq!(outcome.answer, Answer::NoKnowledgeBase);
    assert_eq!(outcome.answer.text(), NO_KNOWLEDGE_BASE_RESPONSE);
    assert_eq!(outcome.history.len(), 4);
    assert_eq!(outcome.history[3].role, ChatRole::Assistant);
    assert_eq!(
        outcome.history[3].content,
        "There is no knowledge base available."
    );
    assert_eq!(h.embedder.calls(), 0);
    assert_eq!(h.model.calls(), 0);
}

#[tokio::test]
async fn test_hedging_answer_is_declined() {
    let h = Harness::new(InvalidationPolicy::Uploader).await;
    h.add_agent("hr").await;
    h.service
        .ingest("hr", "alice", &[document("handbook.pdf", &[filler(2000)])])
        .await
        .unwrap();

    h.model
        .set_reply("I'm not sure, the handbook does not say anything about it.");
    let outcome = h
        .service
        .chat("hr", "alice", "Can I bring my dog?", Vec::new())
        .await
        .unwrap();

    assert_eq!(outcome.answer, Answer::Declined);
    assert!(outcome.answer.offers_handoff());
    assert_eq!(outcome.history[1].content, DECLINE_RESPONSE);

    h.model.set_reply("No");
    let outcome = h
        .service
        .chat("hr", "alice", "Is it allowed?", outcome.history)
        .await
        .unwrap();
    assert_eq!(outcome.answer, Answer::Declined);
    assert_eq!(outcome.history.len(), 4);
}

#[tokio::test]
async fn test_ingest_appends_and_bumps_generation() {
    let h = Harness::new(InvalidationPolicy::Uploader).await;
    h.add_agent("hr").await;

    let first = h
        .service
        .ingest("hr", "alice", &[document("a.pdf", &[filler(5500)])])
        .await
        .unwrap();
    let second = h
        .service
        .ingest("hr", "alice", &[document("b.pdf", &[filler(4000)])])
        .await
        .unwrap();

    assert_eq!(first.total_chunks, 7);
    assert_eq!(second.chunks_added, 5);
    assert_eq!(second.total_chunks, 12);
    assert_eq!(first.location.path, second.location.path);
    assert_eq!(second.location.generation, 2);

    let index = IndexStore::load_path(&second.location.path)
        .unwrap()
        .expect("Index file missing");
    assert_eq!(index.len(), 12);
    assert_eq!(index.generation, 2);
}

#[tokio::test]
async fn test_short_pages_are_ocrd() {
    let h = Harness::new(InvalidationPolicy::Uploader).await;
    h.add_agent("hr").await;

    let scanned = document(
        "scan.pdf",
        &[filler(400), "  ".into(), "Page 3".into(), filler(30)],
    );
    let report = h.service.ingest("hr", "alice", &[scanned]).await.unwrap();

    assert_eq!(h.ocr.calls(), 2);
    assert_eq!(report.chunks_added, 1);

    let index = IndexStore::load_path(&report.location.path).unwrap().unwrap();
    assert_eq!(index.entries[0].text.matches(OCR_TEXT).count(), 2);
}

#[tokio::test]
async fn test_failed_document_does_not_fail_batch() {
    let h = Harness::new(InvalidationPolicy::Uploader).await;
    h.add_agent("hr").await;

    let docs = vec![
        broken_document("corrupt.pdf"),
        document("handbook.pdf", &[filler(1500)]),
    ];
    let report = h.service.ingest("hr", "alice", &docs).await.unwrap();

    assert_eq!(report.indexed_count(), 1);
    let failed: Vec<_> = report.failed().map(|d| d.name.as_str()).collect();
    assert_eq!(failed, vec!["corrupt.pdf"]);
    assert_eq!(report.chunks_added, 2);
}

#[tokio::test]
async fn test_no_valid_text() {
    let h = Harness::new(InvalidationPolicy::Uploader).await;
    h.add_agent("hr").await;

    let docs = vec![broken_document("a.pdf"), broken_document("b.pdf")];
    let err = h.service.ingest("hr", "alice", &docs).await.unwrap_err();

    assert_eq!(err.to_string(), "No valid text found in the uploaded documents");
    match err {
        AgentError::NoValidText { failed } => assert_eq!(failed, vec!["a.pdf", "b.pdf"]),
        other => panic!("Expected NoValidText, got {:?}", other),
    }
    assert!(h.repo.get_agent("hr").await.unwrap().unwrap().vector_index_path.is_none());
}

#[tokio::test]
async fn test_embedding_failure_keeps_index() {
    let h = Harness::new(InvalidationPolicy::Uploader).await;
    h.add_agent("hr").await;
    let first = h
        .service
        .ingest("hr", "alice", &[document("a.pdf", &[filler(1500)])])
        .await
        .unwrap();

    h.embedder.set_failing(true);
    let err = h
        .service
        .ingest("hr", "alice", &[document("b.pdf", &[filler(1500)])])
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::IndexWrite(_)));

    let index = IndexStore::load_path(&first.location.path).unwrap().unwrap();
    assert_eq!(index.len(), first.total_chunks);
    assert_eq!(index.generation, 1);
}

#[tokio::test]
async fn test_unknown_agent() {
    let h = Harness::new(InvalidationPolicy::Uploader).await;

    let err = h
        .service
        .ingest("ghost", "alice", &[document("a.pdf", &[filler(100)])])
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::ConfigNotFound(ref id) if id == "ghost"));

    let err = h
        .service
        .chat("ghost", "alice", "hello?", Vec::new())
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::ConfigNotFound(_)));
}

#[tokio::test]
async fn test_uploader_session_is_replaced() {
    let h = Harness::new(InvalidationPolicy::Uploader).await;
    h.add_agent("hr").await;

    // Both users start on an agent with no knowledge base.
    for user in ["alice", "bob"] {
        let outcome = h.service.chat("hr", user, "hi", Vec::new()).await.unwrap();
        assert_eq!(outcome.answer, Answer::NoKnowledgeBase);
    }
    let alice_before = h.service.pool().get_or_create("hr", "alice");
    let bob_before = h.service.pool().get_or_create("hr", "bob");

    h.service
        .ingest("hr", "alice", &[document("a.pdf", &[filler(1500)])])
        .await
        .unwrap();

    let alice_after = h.service.pool().get_or_create("hr", "alice");
    let bob_after = h.service.pool().get_or_create("hr", "bob");
    assert!(!Arc::ptr_eq(&alice_before, &alice_after));
    assert!(Arc::ptr_eq(&bob_before, &bob_after));
    assert_eq!(alice_after.state(), AnswererState::Unloaded);

    let outcome = h.service.chat("hr", "alice", "notice?", Vec::new()).await.unwrap();
    assert!(outcome.answer.is_grounded());
    let outcome = h.service.chat("hr", "bob", "notice?", Vec::new()).await.unwrap();
    assert_eq!(outcome.answer, Answer::NoKnowledgeBase);
}

#[tokio::test]
async fn test_agent_policy_replaces_stale_sessions() {
    let h = Harness::new(InvalidationPolicy::Agent).await;
    h.add_agent("hr").await;
    h.service
        .ingest("hr", "alice", &[document("a.pdf", &[filler(1500)])])
        .await
        .unwrap();

    h.service.chat("hr", "bob", "notice?", Vec::new()).await.unwrap();
    let bob_before = h.service.pool().get_or_create("hr", "bob");
    assert_eq!(bob_before.loaded_generation(), Some(1));
    let carol_before = h.service.pool().get_or_create("hr", "carol");

    h.service
        .ingest("hr", "alice", &[document("b.pdf", &[filler(1500)])])
        .await
        .unwrap();

    let bob_after = h.service.pool().get_or_create("hr", "bob");
    assert!(!Arc::ptr_eq(&bob_before, &bob_after));
    // Never loaded, so it will read generation 2 anyway
    assert!(Arc::ptr_eq(
        &carol_before,
        &h.service.pool().get_or_create("hr", "carol")
    ));

    h.service.chat("hr", "bob", "notice?", Vec::new()).await.unwrap();
    assert_eq!(bob_after.loaded_generation(), Some(2));
}

#[tokio::test]
async fn test_agent_policy_replaces_session_loading_during_ingest() {
    let (h, directory) = Harness::delayed(InvalidationPolicy::Agent).await;
    h.add_agent("hr").await;

    // Bob's load reads the agent before the upload, then stalls.
    directory.set_lookup_delay(Duration::from_millis(300));
    let bob_chat = h.service.chat("hr", "bob", "notice?", Vec::new());
    let upload = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        directory.set_lookup_delay(Duration::ZERO);
        assert_eq!(
            h.service.pool().get_or_create("hr", "bob").state(),
            AnswererState::Loading
        );
        h.service
            .ingest("hr", "alice", &[document("a.pdf", &[filler(1500)])])
            .await
    };
    let (in_flight, report) = tokio::join!(bob_chat, upload);

    assert_eq!(report.unwrap().location.generation, 1);
    // The call already under way answers from what it read
    assert_eq!(in_flight.unwrap().answer, Answer::NoKnowledgeBase);

    let next = h.service.chat("hr", "bob", "notice?", Vec::new()).await.unwrap();
    assert!(next.answer.is_grounded());
    assert_eq!(
        h.service.pool().get_or_create("hr", "bob").loaded_generation(),
        Some(1)
    );
}

#[tokio::test]
async fn test_unrecorded_index_still_retires_sessions() {
    let (h, directory) = Harness::delayed(InvalidationPolicy::Uploader).await;
    h.add_agent("hr").await;

    h.service.chat("hr", "alice", "hi", Vec::new()).await.unwrap();
    assert!(h.service.pool().last_active("hr", "alice").is_some());

    directory.set_record_failing(true);
    let err = h
        .service
        .ingest("hr", "alice", &[document("a.pdf", &[filler(1500)])])
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::Database(DbError::QueryFailed(_))));

    // The index is in place even though the agent record does not point at it
    let index = h.index_store().load("hr").unwrap().expect("Index missing");
    assert_eq!(index.generation, 1);
    assert!(h.repo.get_agent("hr").await.unwrap().unwrap().vector_index_path.is_none());
    assert!(h.service.pool().last_active("hr", "alice").is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_ingests_are_serialized() {
    let h = Arc::new(Harness::new(InvalidationPolicy::Uploader).await);
    h.add_agent("hr").await;

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let h = Arc::clone(&h);
            tokio::spawn(async move {
                let docs = [document(&format!("doc{}.pdf", i), &[filler(1500)])];
                h.service.ingest("hr", &format!("user{}", i), &docs).await
            })
        })
        .collect();

    let mut added = 0;
    let mut generations = Vec::new();
    for handle in handles {
        let report = handle.await.unwrap().expect("Ingest failed");
        added += report.chunks_added;
        generations.push(report.location.generation);
    }
    generations.sort_unstable();

    assert_eq!(added, 16);
    assert_eq!(generations, (1..=8).collect::<Vec<u64>>());

    let index = h.index_store().load("hr").unwrap().expect("Index missing");
    assert_eq!(index.len(), added);
    assert_eq!(index.generation, 8);
}

/// Embeds queries at a width the stored index was not built with
struct NarrowEmbedder;

#[async_trait]
impl Embedder for NarrowEmbedder {
    async fn embed(&self, texts: &[String]) -> agentdesk_agents::Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|_| vec![1.0; 8]).collect())
    }
}

#[tokio::test]
async fn test_query_width_mismatch_is_reported() {
    let h = Harness::new(InvalidationPolicy::Uploader).await;
    h.add_agent("hr").await;
    h.service
        .ingest("hr", "alice", &[document("a.pdf", &[filler(1500)])])
        .await
        .unwrap();

    let mut context = context_for(&h.repo, h.embedder.clone(), h.model.clone());
    context.embedder = Arc::new(NarrowEmbedder);
    let answerer = RetrievalAnswerer::new("hr", context);

    let err = answerer.answer("notice?", &[]).await.unwrap_err();
    assert!(matches!(
        err,
        AgentError::Database(DbError::DimensionMismatch {
            expected: 32,
            actual: 8
        })
    ));
    assert_eq!(h.model.calls(), 0);
}

#[tokio::test]
async fn test_knowledge_summary_from_uploads() {
    let h = Harness::new(InvalidationPolicy::Uploader).await;

    let docs = vec![
        document("handbook.pdf", &[filler(1500)]),
        broken_document("corrupt.pdf"),
        document(
            "memo.pdf",
            &["Remote work needs written approval from a line manager.".into()],
        ),
    ];
    let summary = h.service.knowledge_summary(&docs).await;

    let lines: Vec<&str> = summary.lines().collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0], format!("{}...", filler(1000)));
    assert_eq!(
        lines[1],
        "Remote work needs written approval from a line manager...."
    );
    assert_eq!(h.ocr.calls(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_readers_never_see_partial_index() {
    let h = Harness::new(InvalidationPolicy::Uploader).await;
    h.add_agent("hr").await;
    let first = h
        .service
        .ingest("hr", "alice", &[document("a.pdf", &[filler(3000)])])
        .await
        .unwrap();

    let path = first.location.path.clone();
    let done = Arc::new(AtomicBool::new(false));
    let reader = {
        let done = Arc::clone(&done);
        std::thread::spawn(move || {
            let mut sizes = Vec::new();
            while !done.load(Ordering::SeqCst) {
                let index = IndexStore::load_path(&path)
                    .expect("Index unreadable during ingest")
                    .expect("Index missing during ingest");
                sizes.push(index.len());
            }
            sizes
        })
    };

    for i in 0..5 {
        let name = format!("doc{}.pdf", i);
        h.service
            .ingest("hr", "alice", &[document(&name, &[filler(3000)])])
            .await
            .unwrap();
    }
    done.store(true, Ordering::SeqCst);

    let sizes = reader.join().expect("Reader panicked");
    assert!(sizes.windows(2).all(|w| w[0] <= w[1]));
    assert!(sizes.iter().all(|&n| n >= first.total_chunks));

    let index = IndexStore::load_path(&first.location.path).unwrap().unwrap();
    assert_eq!(index.len(), first.total_chunks * 6);
    assert_eq!(index.generation, 6);
}

// ==========================================
// TESTS REQUIRING A MODEL PROVIDER
// Run with: cargo test -- --ignored
// ==========================================

/// Embed through the configured provider (requires MODEL_PROVIDER and friends)
#[tokio::test]
#[ignore = "Requires a reachable OpenAI-compatible or Ollama endpoint"]
async fn test_live_provider_embedding() {
    use agentdesk_agents::{Embedder, Settings};

    let settings = Settings::from_env().expect("Invalid settings");
    let client = settings.provider.client();

    if !client.health().await.unwrap_or(false) {
        eprintln!("Skipping test: model provider not available");
        return;
    }

    let embedding = client
        .embed_one("Employees must give 14 days notice.")
        .await
        .expect("Failed to embed");
    assert!(!embedding.is_empty());
}
