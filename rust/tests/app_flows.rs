mod support;

use pawpal_core::error::LoadError;
use pawpal_core::sync::wire::{DEST_EDIT, DEST_REACT, DEST_SEND, DEST_STATUS};
use pawpal_core::sync::{ConversationSummary, LastMessage};
use pawpal_core::{AppAction, AuthState, ConnectionState, FfiApp, MessageDeliveryState};
use support::{
    ref_frame, send_frame, text_message, wait_until, Collector, Harness, TIMEOUT,
};

fn history(chat_id: &str, sender: &str, n: u32) -> Vec<pawpal_core::sync::Message> {
    (1..=n)
        .map(|i| text_message(&format!("m{i}"), chat_id, sender, &format!("msg {i}"), i as i64 * 1000))
        .collect()
}

#[test]
fn starts_logged_out_with_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    support::write_config(&dir.path().to_string_lossy(), serde_json::json!({}));
    let app = FfiApp::new(dir.path().to_string_lossy().to_string());
    let updates = Collector::new();
    app.listen_for_updates(Box::new(updates.clone()));

    let s = app.state();
    assert_eq!(s.auth, AuthState::LoggedOut);
    assert_eq!(s.connection, ConnectionState::Offline);
    assert!(s.chat_list.is_empty());

    app.dispatch(AppAction::Login {
        user_id: " ".into(),
        token: "t".into(),
    });
    wait_until("toast for blank login", TIMEOUT, || updates.last_toast().is_some());
    assert_eq!(app.state().auth, AuthState::LoggedOut);
}

#[test]
fn login_connects_and_subscribes_user_queues() {
    let h = Harness::start();
    h.login("u1");

    assert_eq!(
        h.state().auth,
        AuthState::LoggedIn {
            user_id: "u1".into()
        }
    );
    assert_eq!(h.transport.user_id().as_deref(), Some("u1"));
    assert!(!h.state().busy.logging_in);

    let revs = h.updates.revs();
    assert!(revs.windows(2).all(|w| w[0] < w[1]), "revs not monotonic: {revs:?}");
}

#[test]
fn rejected_token_fails_without_retry() {
    let h = Harness::start();
    h.transport.reject_auth(true);
    h.dispatch(AppAction::Login {
        user_id: "u1".into(),
        token: "bad".into(),
    });
    wait_until("connection failed", TIMEOUT, || {
        matches!(h.state().connection, ConnectionState::Failed { .. })
    });
    assert_eq!(h.transport.connect_attempts(), 1);
    assert!(h
        .updates
        .last_toast()
        .is_some_and(|t| t.contains("Sign-in rejected")));
}

#[test]
fn flaky_connect_is_retried_until_it_succeeds() {
    let h = Harness::start();
    h.transport.fail_next_connects(2);
    h.login("u1");
    assert_eq!(h.transport.connect_attempts(), 3);
}

#[test]
fn open_chat_pages_newest_first_then_older() {
    let h = Harness::start();
    h.api.set_history("c1", history("c1", "u2", 50));
    h.login("u1");
    h.open_chat("c1");

    let chat = h.state().current_chat.unwrap();
    assert_eq!(chat.messages.len(), 20);
    assert!(chat.can_load_older);
    assert_eq!(chat.messages.first().unwrap().id, "m31");

    h.dispatch(AppAction::LoadOlderMessages {
        chat_id: "c1".into(),
    });
    wait_until("second page merged", TIMEOUT, || h.messages().len() == 40);

    let chat = h.state().current_chat.unwrap();
    assert!(chat.can_load_older);
    let ids: Vec<String> = chat.messages.iter().map(|m| m.id.clone()).collect();
    let expected: Vec<String> = (11..=50).map(|i| format!("m{i}")).collect();
    assert_eq!(ids, expected);
    assert!(chat
        .messages
        .windows(2)
        .all(|w| w[0].timestamp <= w[1].timestamp));
}

#[test]
fn history_failure_sets_banner_and_reload_clears_it() {
    let h = Harness::start();
    h.api.fail_history_with(Some(LoadError::Status(503)));
    h.login("u1");
    h.dispatch(AppAction::OpenChat {
        chat_id: "c1".into(),
    });
    wait_until("load error shown", TIMEOUT, || {
        h.state()
            .current_chat
            .is_some_and(|c| c.load_error.is_some())
    });

    h.api.fail_history_with(None);
    h.api.set_history("c1", history("c1", "u2", 3));
    h.dispatch(AppAction::ReloadChat {
        chat_id: "c1".into(),
    });
    wait_until("reload succeeded", TIMEOUT, || {
        h.state()
            .current_chat
            .is_some_and(|c| c.load_error.is_none() && c.messages.len() == 3)
    });
}

#[test]
fn send_and_echo_leave_exactly_one_message() {
    let h = Harness::start();
    h.login("u1");
    h.open_chat("c1");

    h.dispatch(AppAction::SendMessage {
        chat_id: "c1".into(),
        content: "woof".into(),
        reply_to_message_id: None,
    });
    wait_until("send published", TIMEOUT, || {
        h.transport.published_to(DEST_SEND).len() == 1
    });
    let payload = &h.published_json(DEST_SEND)[0];
    assert_eq!(payload["chatId"], "c1");
    assert_eq!(payload["content"], "woof");
    assert_eq!(payload["isFile"], false);
    let client_id = payload["clientId"].as_str().unwrap().to_string();

    h.push_message_frame(
        "u1",
        send_frame("s1", "c1", "u1", "woof", 5_000, Some(&client_id)),
    );
    wait_until("optimistic record promoted", TIMEOUT, || {
        h.messages()
            .iter()
            .any(|m| m.server_id.as_deref() == Some("s1"))
    });

    let msgs = h.messages();
    assert_eq!(msgs.len(), 1);
    assert_eq!(msgs[0].client_id.as_deref(), Some(client_id.as_str()));
    assert_eq!(msgs[0].delivery, MessageDeliveryState::Sent);
    assert!(msgs[0].is_mine);
}

#[test]
fn echo_before_publish_ack_does_not_duplicate() {
    let h = Harness::start();
    h.login("u1");
    h.open_chat("c1");
    h.transport
        .set_publish_delay(std::time::Duration::from_millis(300));

    h.dispatch(AppAction::SendMessage {
        chat_id: "c1".into(),
        content: "bark".into(),
        reply_to_message_id: None,
    });
    wait_until("optimistic record shown", TIMEOUT, || {
        h.messages()
            .first()
            .is_some_and(|m| m.delivery == MessageDeliveryState::Pending)
    });

    // Echo without a correlation id: matched on sender, body and time.
    let now = pawpal_core::now_millis();
    h.push_message_frame("u1", send_frame("s9", "c1", "u1", "bark", now, None));
    wait_until("promoted by echo", TIMEOUT, || {
        h.messages()
            .first()
            .is_some_and(|m| m.server_id.as_deref() == Some("s9"))
    });
    wait_until("publish completed", TIMEOUT, || {
        h.transport.published_to(DEST_SEND).len() == 1
    });
    std::thread::sleep(std::time::Duration::from_millis(50));

    let msgs = h.messages();
    assert_eq!(msgs.len(), 1);
    assert_eq!(msgs[0].delivery, MessageDeliveryState::Sent);
}

#[test]
fn offline_send_fails_and_retry_republishes() {
    let h = Harness::start();
    h.login("u1");
    h.open_chat("c1");
    h.transport.set_offline(true);

    h.dispatch(AppAction::SendMessage {
        chat_id: "c1".into(),
        content: "anyone there?".into(),
        reply_to_message_id: None,
    });
    wait_until("send failed", TIMEOUT, || {
        h.messages()
            .first()
            .is_some_and(|m| matches!(m.delivery, MessageDeliveryState::Failed { .. }))
    });
    let failed = h.messages().remove(0);
    assert_eq!(failed.content, "anyone there?");
    assert!(failed.server_id.is_none());

    h.transport.set_offline(false);
    h.dispatch(AppAction::RetryMessage {
        chat_id: "c1".into(),
        client_id: failed.client_id.clone().unwrap(),
    });
    wait_until("retry published", TIMEOUT, || {
        h.transport.published_to(DEST_SEND).len() == 1
    });
    let payload = &h.published_json(DEST_SEND)[0];
    assert_eq!(payload["clientId"].as_str(), failed.client_id.as_deref());
    wait_until("back to pending", TIMEOUT, || {
        h.messages()
            .first()
            .is_some_and(|m| m.delivery == MessageDeliveryState::Pending)
    });
    assert_eq!(h.messages().len(), 1);
}

#[test]
fn discard_removes_failed_send() {
    let h = Harness::start();
    h.login("u1");
    h.open_chat("c1");
    h.transport.set_offline(true);
    h.dispatch(AppAction::SendFile {
        chat_id: "c1".into(),
        file_url: "https://cdn.pawpal.app/rex.jpg".into(),
        reply_to_message_id: None,
    });
    wait_until("file send failed", TIMEOUT, || {
        h.messages()
            .first()
            .is_some_and(|m| matches!(m.delivery, MessageDeliveryState::Failed { .. }))
    });
    let failed = h.messages().remove(0);
    assert_eq!(failed.file_url.as_deref(), Some("https://cdn.pawpal.app/rex.jpg"));

    h.dispatch(AppAction::DiscardMessage {
        chat_id: "c1".into(),
        client_id: failed.client_id.unwrap(),
    });
    wait_until("discarded", TIMEOUT, || h.messages().is_empty());
}

#[test]
fn discarding_failed_send_restores_chat_preview() {
    let h = Harness::start();
    let mut c1 = ConversationSummary::new("c1", "u1", "u2");
    c1.last_message = Some(LastMessage::from(&text_message("m2", "c1", "u2", "msg 2", 2_000)));
    h.api.set_chats(vec![c1]);
    h.api.set_history("c1", history("c1", "u2", 2));
    h.login("u1");
    h.open_chat("c1");
    wait_until("history loaded", TIMEOUT, || h.messages().len() == 2);
    h.transport.set_offline(true);

    h.dispatch(AppAction::SendMessage {
        chat_id: "c1".into(),
        content: "woof?".into(),
        reply_to_message_id: None,
    });
    wait_until("preview shows the send", TIMEOUT, || {
        h.chat("c1")
            .is_some_and(|c| c.last_message.as_deref() == Some("woof?"))
    });
    wait_until("send failed", TIMEOUT, || {
        h.messages()
            .iter()
            .any(|m| matches!(m.delivery, MessageDeliveryState::Failed { .. }))
    });
    let failed = h
        .messages()
        .into_iter()
        .find(|m| m.content == "woof?")
        .unwrap();

    h.dispatch(AppAction::DiscardMessage {
        chat_id: "c1".into(),
        client_id: failed.client_id.unwrap(),
    });
    wait_until("preview restored", TIMEOUT, || {
        h.chat("c1")
            .is_some_and(|c| c.last_message.as_deref() == Some("msg 2"))
    });
    assert_eq!(h.messages().len(), 2);
}

#[test]
fn inbound_for_unopened_chat_counts_unread_once() {
    let h = Harness::start();
    h.api.set_chats(vec![
        ConversationSummary::new("c1", "u1", "u2"),
        ConversationSummary::new("c2", "u1", "u3"),
    ]);
    h.login("u1");
    wait_until("chat list loaded", TIMEOUT, || h.state().chat_list.len() == 2);
    h.open_chat("c1");

    let frame = send_frame("x1", "c2", "u3", "meow", 1_000, None);
    h.push_message_frame("u1", frame.clone());
    // Same event again, as if it also came over a second channel.
    h.push_message_frame("u1", frame);
    h.push_message_frame("u1", send_frame("x2", "c2", "u3", "meow?", 2_000, None));

    wait_until("second message counted", TIMEOUT, || {
        h.chat("c2").is_some_and(|c| c.unread_count == 2)
    });
    let c2 = h.chat("c2").unwrap();
    assert_eq!(c2.last_message.as_deref(), Some("meow?"));
    assert!(!c2.last_message_is_mine);
    assert_eq!(h.chat("c1").unwrap().unread_count, 0);
    assert!(h.messages().is_empty());
}

#[test]
fn send_in_unknown_conversation_creates_summary() {
    let h = Harness::start();
    h.login("u1");
    h.push_message_frame("u1", send_frame("n1", "c9", "u7", "hi there", 1_000, None));
    wait_until("new summary", TIMEOUT, || {
        h.chat("c9")
            .is_some_and(|c| c.unread_count == 1 && c.peer_id == "u7")
    });
}

#[test]
fn delete_of_last_message_clears_preview() {
    let h = Harness::start();
    let mut c1 = ConversationSummary::new("c1", "u1", "u2");
    c1.last_message = Some(LastMessage::from(&text_message("m9", "c1", "u2", "bye", 9_000)));
    h.api.set_chats(vec![c1]);
    h.login("u1");
    wait_until("preview loaded", TIMEOUT, || {
        h.chat("c1")
            .is_some_and(|c| c.last_message.as_deref() == Some("bye"))
    });

    h.push_message_frame("u1", ref_frame("DELETE", "m9", "c1"));
    wait_until("preview cleared", TIMEOUT, || {
        h.chat("c1").is_some_and(|c| c.last_message.is_none())
    });
}

#[test]
fn open_chat_acknowledges_delivered_then_read() {
    let h = Harness::start();
    h.api.set_history("c1", history("c1", "u2", 2));
    h.login("u1");
    h.open_chat("c1");

    wait_until("both messages read", TIMEOUT, || {
        let msgs = h.messages();
        msgs.len() == 2
            && msgs
                .iter()
                .all(|m| m.delivery == MessageDeliveryState::Read)
    });

    let acks = h.published_json(DEST_STATUS);
    assert_eq!(acks.len(), 4);
    for id in ["m1", "m2"] {
        let statuses: Vec<&str> = acks
            .iter()
            .filter(|a| a["messageId"] == id)
            .filter_map(|a| a["status"].as_str())
            .collect();
        assert_eq!(statuses, vec!["DELIVERED", "READ"], "acks for {id}");
    }
}

#[test]
fn own_messages_are_not_acknowledged() {
    let h = Harness::start();
    h.api.set_history("c1", history("c1", "u1", 3));
    h.login("u1");
    h.open_chat("c1");
    std::thread::sleep(std::time::Duration::from_millis(200));
    assert!(h.transport.published_to(DEST_STATUS).is_empty());
}

#[test]
fn react_then_failed_change_rolls_back() {
    let h = Harness::start();
    h.api
        .set_history("c1", vec![text_message("m1", "c1", "u1", "look", 1_000)]);
    h.login("u1");
    h.open_chat("c1");

    h.dispatch(AppAction::React {
        chat_id: "c1".into(),
        message_id: "m1".into(),
        kind: "paw".into(),
    });
    wait_until("reaction published", TIMEOUT, || {
        h.transport.published_to(DEST_REACT).len() == 1
    });
    let reaction = &h.messages()[0].reactions[0];
    assert_eq!(reaction.kind, "paw");
    assert!(reaction.reacted_by_me);

    // Server broadcast makes "paw" the confirmed rollback point.
    assert!(h.transport.push(
        "/user/u1/queue/reactions",
        serde_json::json!({
            "type": "REACTION_ADD",
            "messageId": "m1",
            "chatId": "c1",
            "userId": "u1",
            "reaction": "paw",
        })
        .to_string(),
    ));
    std::thread::sleep(std::time::Duration::from_millis(100));

    h.transport.reject_next_publishes(1);
    h.dispatch(AppAction::React {
        chat_id: "c1".into(),
        message_id: "m1".into(),
        kind: "heart".into(),
    });
    wait_until("rollback toast", TIMEOUT, || {
        h.updates
            .last_toast()
            .is_some_and(|t| t.contains("Reaction failed"))
    });
    let reactions = h.messages()[0].reactions.clone();
    assert_eq!(reactions.len(), 1);
    assert_eq!(reactions[0].kind, "paw");
}

#[test]
fn edit_is_published_and_confirmed_by_echo() {
    let h = Harness::start();
    h.api
        .set_history("c1", vec![text_message("m1", "c1", "u1", "good bot", 1_000)]);
    h.login("u1");
    h.open_chat("c1");

    h.dispatch(AppAction::EditMessage {
        chat_id: "c1".into(),
        message_id: "m1".into(),
        content: "good dog".into(),
    });
    wait_until("edit published", TIMEOUT, || {
        h.transport.published_to(DEST_EDIT).len() == 1
    });
    let payload = &h.published_json(DEST_EDIT)[0];
    assert_eq!(payload["messageId"], "m1");
    assert_eq!(payload["content"], "good dog");

    h.push_message_frame(
        "u1",
        serde_json::json!({
            "type": "EDIT",
            "message": { "id": "m1", "chatId": "c1", "content": "good dog", "edited": true }
        }),
    );
    std::thread::sleep(std::time::Duration::from_millis(50));
    let m = h.messages().remove(0);
    assert_eq!(m.content, "good dog");
    assert!(m.edited);
}

#[test]
fn pin_failure_rolls_back_with_toast() {
    let h = Harness::start();
    h.api.set_chats(vec![ConversationSummary::new("c1", "u1", "u2")]);
    h.login("u1");
    wait_until("chat list loaded", TIMEOUT, || h.chat("c1").is_some());

    h.api
        .fail_settings_with(Some(LoadError::Network("down".into())));
    h.dispatch(AppAction::SetChatPinned {
        chat_id: "c1".into(),
        pinned: true,
    });
    wait_until("rollback toast", TIMEOUT, || {
        h.updates
            .last_toast()
            .is_some_and(|t| t.contains("Couldn't update chat"))
    });
    assert!(!h.chat("c1").unwrap().pinned);
}

#[test]
fn pinned_chats_sort_first() {
    let h = Harness::start();
    let mut old = ConversationSummary::new("old", "u1", "u2");
    old.last_message = Some(LastMessage::from(&text_message("a", "old", "u2", "x", 1_000)));
    let mut new = ConversationSummary::new("new", "u1", "u3");
    new.last_message = Some(LastMessage::from(&text_message("b", "new", "u3", "y", 2_000)));
    h.api.set_chats(vec![old, new]);
    h.login("u1");
    wait_until("chat list loaded", TIMEOUT, || h.state().chat_list.len() == 2);
    assert_eq!(h.state().chat_list[0].chat_id, "new");

    h.dispatch(AppAction::SetChatPinned {
        chat_id: "old".into(),
        pinned: true,
    });
    wait_until("pin confirmed", TIMEOUT, || h.api.settings_updates().len() == 1);
    let list = h.state().chat_list;
    assert_eq!(list[0].chat_id, "old");
    assert!(list[0].pinned);
}

#[test]
fn reconnect_resubscribes_and_refetches_open_chat() {
    let h = Harness::start();
    h.api.set_history("c1", history("c1", "u1", 5));
    h.login("u1");
    h.open_chat("c1");
    let fetches_before = h.api.history_calls().len();

    h.transport.drop_connection("server restart");
    wait_until("reconnected and re-synced", TIMEOUT, || {
        h.transport.connect_attempts() >= 2
            && h.state().connection == ConnectionState::Connected
            && h.transport.subscribed_topics().len() == 2
            && h.api.history_calls().len() > fetches_before
    });
    assert_eq!(h.messages().len(), 5);
}

#[test]
fn per_conversation_mode_follows_open_chat() {
    let h = Harness::start_with_config(serde_json::json!({
        "subscription_mode": "per_conversation",
    }));
    h.login("u1");
    h.open_chat("c1");
    wait_until("conversation topic subscribed", TIMEOUT, || {
        h.transport
            .subscribed_topics()
            .contains(&"/topic/chat/c1".to_string())
    });

    h.dispatch(AppAction::CloseChat);
    wait_until("conversation topic released", TIMEOUT, || {
        !h.transport
            .subscribed_topics()
            .contains(&"/topic/chat/c1".to_string())
    });
    assert!(h.state().current_chat.is_none());
}

#[test]
fn logout_clears_everything() {
    let h = Harness::start();
    h.api.set_chats(vec![ConversationSummary::new("c1", "u1", "u2")]);
    h.login("u1");
    h.open_chat("c1");

    h.dispatch(AppAction::Logout);
    wait_until("logged out", TIMEOUT, || h.state().auth == AuthState::LoggedOut);
    let s = h.state();
    assert!(s.chat_list.is_empty());
    assert!(s.current_chat.is_none());
    assert_eq!(s.connection, ConnectionState::Offline);
    assert!(!h.transport.is_open());
}
