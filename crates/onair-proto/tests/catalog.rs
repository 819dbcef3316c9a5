use onair_proto::catalog::{external_links, MetadataSource, StreamCatalog, StreamId};
use onair_proto::protocol::{Command, Interruption, Message, RemoteCommand};

#[test]
fn builtin_catalog_covers_every_stream_id() {
    let catalog = StreamCatalog::builtin();
    assert_eq!(catalog.len(), StreamId::ALL.len());
    for id in StreamId::ALL {
        let stream = catalog.get(id).expect("missing stream");
        assert_eq!(stream.id, id);
        assert!(stream.url.starts_with("https://"), "{} is not https", stream.url);
        assert!(!stream.display_title.is_empty());
    }
}

#[test]
fn exactly_one_stream_uses_polled_metadata() {
    let catalog = StreamCatalog::builtin();
    let polled: Vec<_> = catalog
        .iter()
        .filter(|s| s.metadata == MetadataSource::Polled)
        .map(|s| s.id)
        .collect();
    assert_eq!(polled, vec![StreamId::RadioT]);
}

#[test]
fn stream_ids_use_kebab_case_on_the_wire() {
    let json = serde_json::to_string(&Command::SelectStream {
        id: StreamId::WkncHd1,
    })
    .unwrap();
    assert_eq!(json, r#"{"cmd":"SelectStream","id":"wknc-hd1"}"#);
    assert_eq!(StreamId::parse("radio-t"), Some(StreamId::RadioT));
    assert_eq!(StreamId::parse("RADIO-T"), None);
}

#[test]
fn interruption_command_decodes_from_client_json() {
    let raw = br#"{"cmd":"Interruption","event":{"kind":"ended","should_resume":true}}"#;
    let mut frame = (raw.len() as u32).to_be_bytes().to_vec();
    frame.extend_from_slice(raw);
    let (msg, used) = Message::decode(&frame).unwrap();
    assert_eq!(used, frame.len());
    match msg {
        Message::Command(cmd) => assert_eq!(
            cmd,
            Command::Interruption {
                event: Interruption::Ended {
                    should_resume: true
                }
            }
        ),
        other => panic!("unexpected message {:?}", other),
    }
}

#[test]
fn remote_command_decodes_from_client_json() {
    let cmd: Command =
        serde_json::from_str(r#"{"cmd":"Remote","command":"toggle-play-pause"}"#).unwrap();
    assert_eq!(
        cmd,
        Command::Remote {
            command: RemoteCommand::TogglePlayPause
        }
    );
}

#[test]
fn external_links_point_at_news_and_chat() {
    let links = external_links();
    let names: Vec<_> = links.iter().map(|l| l.name.as_str()).collect();
    assert_eq!(names, vec!["news", "chat"]);
    assert_eq!(links[0].url, "https://news.radio-t.com");
    assert_eq!(links[1].url, "https://t.me/radio_t_chat");
}
