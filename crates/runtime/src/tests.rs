#[cfg(test)]
mod tests {
    use crate::decoder::*;
    use crate::orchestrator::*;
    use crate::testing::{event_document, event_line, ScriptedClient};
    use chatrelay_common::{
        ConversationRecord, ConversationRequest, Error, ObservableMetrics, Result, Role, Turn,
    };
    use chatrelay_store::{MemoryStore, StoreHandle};
    use futures::StreamExt;
    use std::sync::Arc;

    async fn decode(chunks: Vec<Vec<u8>>) -> Result<Vec<String>> {
        let source = futures::stream::iter(chunks.into_iter().map(Ok::<_, Error>));
        decode_lines(source).collect::<Vec<_>>().await.into_iter().collect()
    }

    fn mixed_document() -> String {
        let mut doc = String::new();
        doc.push_str(": keep-alive\n\n");
        doc.push_str("event: completion\r\n");
        doc.push_str(&event_line("Grüße"));
        doc.push_str("data: {\"choices\":[]}   \r\n\r\n");
        doc.push_str(&event_line(" 👋 there"));
        doc.push_str("data: [DONE]\n\n");
        doc.push_str(&event_line("after the end"));
        doc
    }

    fn request(id: &str, text: &str) -> ConversationRequest {
        ConversationRequest {
            conversation_id: id.to_string(),
            text: text.to_string(),
            stream: None,
        }
    }

    fn setup(client: ScriptedClient) -> (CompletionOrchestrator, StoreHandle) {
        let store = StoreHandle::new(MemoryStore::new());
        let settings = CompletionSettings {
            model: "gpt-3.5-turbo".to_string(),
            temperature: 0.6,
            max_tokens: Some(100),
        };
        (
            CompletionOrchestrator::new(store.clone(), Arc::new(client), settings),
            store,
        )
    }

    async fn drain(
        orchestrator: &CompletionOrchestrator,
        id: &str,
        text: &str,
    ) -> Vec<Result<String>> {
        let stream = orchestrator
            .stream(request(id, text), "sk-test")
            .await
            .expect("stream should start");
        stream.collect().await
    }

    // Decoder

    #[test]
    fn test_frame_decoder_waits_for_line_end() {
        let mut decoder = FrameDecoder::new();
        decoder.push(b"data: {\"a\"");
        assert_eq!(decoder.next_line(), None);

        decoder.push(b":1}\ndata: par");
        assert_eq!(decoder.next_line().as_deref(), Some("data: {\"a\":1}"));
        assert_eq!(decoder.next_line(), None);
        assert_eq!(decoder.remainder(), b"data: par");
    }

    #[test]
    fn test_frame_decoder_stops_at_sentinel() {
        let mut decoder = FrameDecoder::new();
        decoder.push(b"data: one\ndata: [DONE]\ndata: two\n");

        assert_eq!(decoder.next_line().as_deref(), Some("data: one"));
        assert_eq!(decoder.next_line(), None);
        assert!(decoder.is_done());

        decoder.push(b"data: three\n");
        assert_eq!(decoder.next_line(), None);
        assert!(decoder.remainder().is_empty());
    }

    #[test]
    fn test_sentinel_with_trailing_whitespace_still_ends() {
        let mut decoder = FrameDecoder::new();
        decoder.push(b"data: [DONE]  \r\ndata: late\n");
        assert_eq!(decoder.next_line(), None);
        assert!(decoder.is_done());
    }

    #[tokio::test]
    async fn test_decode_drops_non_event_lines() -> Result<()> {
        let lines = decode(vec![mixed_document().into_bytes()]).await?;

        assert_eq!(lines.len(), 3);
        assert!(lines.iter().all(|line| line.starts_with(EVENT_PREFIX)));
        assert!(!lines.iter().any(|line| line == DONE_SENTINEL));
        assert!(!lines.iter().any(|line| line.contains("after the end")));
        assert_eq!(lines[1], "data: {\"choices\":[]}");
        Ok(())
    }

    #[tokio::test]
    async fn test_decode_is_independent_of_chunk_boundaries() -> Result<()> {
        let doc = mixed_document().into_bytes();
        let expected = decode(vec![doc.clone()]).await?;

        for split in 0..=doc.len() {
            let (head, tail) = doc.split_at(split);
            let lines = decode(vec![head.to_vec(), tail.to_vec()]).await?;
            assert_eq!(lines, expected, "split at byte {}", split);
        }

        let bytewise = decode(doc.iter().map(|b| vec![*b]).collect()).await?;
        assert_eq!(bytewise, expected);
        Ok(())
    }

    #[tokio::test]
    async fn test_decode_discards_unterminated_tail() -> Result<()> {
        let lines = decode(vec![b"data: whole\ndata: half".to_vec()]).await?;
        assert_eq!(lines, vec!["data: whole"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_decode_passes_transport_error_through_once() {
        let source = futures::stream::iter(vec![
            Ok(b"data: one\n".to_vec()),
            Err(Error::Transport("reset".into())),
            Ok(b"data: two\n".to_vec()),
        ]);
        let items: Vec<Result<String>> = decode_lines(source).collect().await;

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().ok().map(String::as_str), Some("data: one"));
        assert!(matches!(items[1], Err(Error::Transport(_))));
    }

    #[tokio::test]
    async fn test_payloads_strip_event_prefix() -> Result<()> {
        let doc = "data: {\"x\":1}\n\ndata: not json at all\n\ndata: [DONE]\n";
        let source = futures::stream::iter(vec![Ok::<_, Error>(doc.as_bytes().to_vec())]);
        let payloads: Vec<String> = event_payloads(source)
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .collect::<Result<_>>()?;

        assert_eq!(payloads, vec!["{\"x\":1}", "not json at all"]);
        Ok(())
    }

    #[test]
    fn test_parse_fragment() {
        assert_eq!(
            parse_fragment(r#"{"choices":[{"delta":{"content":"Hi"}}]}"#).unwrap(),
            Some("Hi".to_string())
        );
        assert_eq!(
            parse_fragment(r#"{"choices":[{"delta":{"role":"assistant"}}]}"#).unwrap(),
            None
        );
        assert_eq!(
            parse_fragment(r#"{"choices":[{"delta":{"content":""}}]}"#).unwrap(),
            None
        );
        assert!(matches!(parse_fragment("{broken"), Err(Error::DecodeWarning(_))));
    }

    // Orchestrator

    #[tokio::test]
    async fn test_stream_appends_each_fragment() -> Result<()> {
        let client = ScriptedClient::with_fragments(&["Hi", " there"]).chunked(7);
        let (orchestrator, store) = setup(client.clone());

        let fragments: Vec<String> = drain(&orchestrator, "c1", "hello")
            .await
            .into_iter()
            .collect::<Result<_>>()?;
        assert_eq!(fragments, vec!["Hi", " there"]);

        let record = store.get("c1").await?.expect("record should exist");
        assert_eq!(record.name(), "hello");
        assert_eq!(
            record.messages(),
            &[Turn::user("hello"), Turn::assistant("Hi"), Turn::assistant(" there")]
        );

        let requests = client.requests();
        assert_eq!(requests.len(), 1);
        let (sent, credential) = &requests[0];
        assert_eq!(credential, "sk-test");
        assert!(sent.stream);
        assert_eq!(sent.model, "gpt-3.5-turbo");
        assert_eq!(sent.max_tokens, Some(100));
        assert_eq!(sent.messages, vec![Turn::user("hello")]);
        Ok(())
    }

    #[tokio::test]
    async fn test_fragment_count_matches_turns() -> Result<()> {
        let fragments = ["a", "b", "c", "d", "e"];
        let (orchestrator, store) = setup(ScriptedClient::with_fragments(&fragments).chunked(3));

        let results = drain(&orchestrator, "c1", "count").await;
        assert_eq!(results.len(), fragments.len());

        let record = store.get("c1").await?.expect("record should exist");
        assert_eq!(record.messages().len(), fragments.len() + 1);
        assert!(record.messages()[1..].iter().all(|turn| turn.role == Role::Assistant));
        Ok(())
    }

    #[tokio::test]
    async fn test_malformed_fragment_is_skipped() -> Result<()> {
        let mut body = event_line("Hi");
        body.push_str("data: {\"choices\": [ oops\n\n");
        body.push_str(&event_line(" there"));
        body.push_str("data: [DONE]\n\n");

        let metrics = ObservableMetrics::new();
        let (orchestrator, store) = setup(ScriptedClient::streaming(body));
        let orchestrator = orchestrator.with_metrics(metrics.clone());

        let results = drain(&orchestrator, "c1", "hello").await;
        assert!(results.iter().all(|item| item.is_ok()));
        assert_eq!(results.len(), 2);

        let record = store.get("c1").await?.expect("record should exist");
        assert_eq!(record.messages().len(), 3);
        assert_eq!(metrics.snapshot().await.decode_warnings, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_history_is_sent_on_next_turn() -> Result<()> {
        let client = ScriptedClient::with_fragments(&["Hi"]);
        let (orchestrator, store) = setup(client.clone());

        drain(&orchestrator, "c1", "hello").await;
        drain(&orchestrator, "c1", "and again").await;

        let requests = client.requests();
        assert_eq!(
            requests[1].0.messages,
            vec![Turn::user("hello"), Turn::assistant("Hi"), Turn::user("and again")]
        );

        // The name is fixed when the record is created
        let record = store.get("c1").await?.expect("record should exist");
        assert_eq!(record.name(), "hello");
        assert_eq!(record.messages().len(), 4);
        Ok(())
    }

    #[tokio::test]
    async fn test_empty_text_touches_nothing() -> Result<()> {
        let client = ScriptedClient::with_fragments(&["Hi"]);
        let (orchestrator, store) = setup(client.clone());

        let result = orchestrator.stream(request("c1", ""), "sk-test").await;
        assert!(matches!(result, Err(Error::Validation(_))));
        assert!(!store.has("c1").await?);
        assert!(client.requests().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_upstream_rejection_keeps_record_without_user_turn() -> Result<()> {
        let body = serde_json::json!({"error": {"message": "Incorrect API key provided"}});
        let (orchestrator, store) = setup(ScriptedClient::rejecting(401, body.clone()));

        match orchestrator.stream(request("c1", "hello"), "bad-key").await {
            Err(Error::Upstream { status, body: forwarded }) => {
                assert_eq!(status, 401);
                assert_eq!(forwarded, body);
            }
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("expected upstream rejection"),
        }

        let record = store.get("c1").await?.expect("record should be created");
        assert!(record.messages().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_transport_error_keeps_saved_fragments() -> Result<()> {
        // No sentinel: the connection drops after two fragments
        let body = format!("{}{}", event_line("Hi"), event_line(" there"));
        let client = ScriptedClient::streaming(body)
            .chunked(5)
            .failing_after_body("connection reset");
        let (orchestrator, store) = setup(client);

        let results = drain(&orchestrator, "c1", "hello").await;
        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok() && results[1].is_ok());
        assert!(matches!(results[2], Err(Error::Transport(_))));

        let record = store.get("c1").await?.expect("record should exist");
        assert_eq!(record.messages().len(), 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_stream_without_fragments_saves_user_turn() -> Result<()> {
        let (orchestrator, store) = setup(ScriptedClient::streaming(event_document(&[])));

        let results = drain(&orchestrator, "c1", "hello").await;
        assert!(results.is_empty());

        let record = store.get("c1").await?.expect("record should exist");
        assert_eq!(record.messages(), &[Turn::user("hello")]);
        Ok(())
    }

    #[tokio::test]
    async fn test_existing_record_is_reused() -> Result<()> {
        let (orchestrator, store) = setup(ScriptedClient::with_fragments(&["ok"]));

        let mut existing = ConversationRecord::new("c1", "first question");
        existing.push_user("first question");
        existing.push_assistant("first answer")?;
        store.set("c1", &existing).await?;

        drain(&orchestrator, "c1", "second").await;

        let record = store.get("c1").await?.expect("record should exist");
        assert_eq!(record.name(), "first question");
        assert_eq!(record.messages().len(), 4);
        Ok(())
    }

    #[tokio::test]
    async fn test_complete_saves_once_with_full_answer() -> Result<()> {
        let client = ScriptedClient::completing("Hello! How can I help?");
        let (orchestrator, store) = setup(client.clone());

        let record = orchestrator.complete(request("c1", "hello"), "sk-test").await?;
        assert_eq!(
            record.messages(),
            &[Turn::user("hello"), Turn::assistant("Hello! How can I help?")]
        );
        assert_eq!(store.get("c1").await?, Some(record));
        assert!(!client.requests()[0].0.stream);
        Ok(())
    }

    #[tokio::test]
    async fn test_complete_without_content_keeps_user_turn() -> Result<()> {
        let (orchestrator, store) = setup(ScriptedClient::completing(""));

        let record = orchestrator.complete(request("c1", "hello"), "sk-test").await?;
        assert_eq!(record.messages(), &[Turn::user("hello")]);
        assert_eq!(store.get("c1").await?.map(|r| r.messages().len()), Some(1));
        Ok(())
    }

    #[tokio::test]
    async fn test_run_selects_mode() -> Result<()> {
        let (orchestrator, _) = setup(ScriptedClient::completing("done"));
        match orchestrator.run(request("c1", "hello"), "sk-test", false).await? {
            Completion::Finished(record) => assert_eq!(record.messages().len(), 2),
            Completion::Streaming(_) => panic!("expected a finished record"),
        }

        let (orchestrator, _) = setup(ScriptedClient::with_fragments(&["a"]));
        assert!(matches!(
            orchestrator.run(request("c2", "hello"), "sk-test", true).await?,
            Completion::Streaming(_)
        ));
        Ok(())
    }
}
