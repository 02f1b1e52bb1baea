//! Turn controller integration tests.
//!
//! Every test drives a full controller against scripted collaborators
//! under paused time, so sessions that span minutes of wall-clock
//! cooldowns and watchdogs run in milliseconds with no audio hardware.

mod common;

use std::time::Duration;

use common::{
    ScriptedDialogue, harness, harness_with, reply, wait_for_phase, wait_for_system_utterance,
    wait_for_user_utterance,
};
use skylark_voice::capture::CaptureEvent;
use skylark_voice::config::TurnTuning;
use skylark_voice::{Error, Language, Phase};

#[tokio::test(start_paused = true)]
async fn test_end_to_end_first_turn() {
    let mut h = harness(vec![
        reply("Hi! What's your name?"),
        reply("Nice to meet you, Ada!"),
    ]);
    let cancel = h.controller.cancel_token();

    let script = async {
        wait_for_phase(&mut h.events, Phase::Listening).await;
        h.capture_tx
            .send(CaptureEvent::Final("My name is Ada".to_string()))
            .unwrap();
        wait_for_phase(&mut h.events, Phase::Listening).await;
        cancel.cancel();
    };
    let (outcome, ()) = tokio::join!(h.controller.run(), script);

    assert!(outcome.is_ok());
    assert_eq!(h.controller.phase(), Phase::Stopped);

    let calls = h.dialogue.recorded();
    assert_eq!(calls.len(), 2);
    assert!(calls[0].include_seed);
    assert!(calls[0].user_text.is_empty());
    assert_eq!(calls[0].history_len, 0);
    assert_eq!(calls[1].user_text, "My name is Ada");
    assert_eq!(calls[1].history_len, 2);
    assert!(!calls[1].include_seed);
    assert!(!calls[1].no_reply);
    assert_eq!(calls[1].language, Language::EnUs);

    let history = h.controller.history();
    assert_eq!(history.len(), 3);
    assert_eq!(history.entries()[2].text, "Nice to meet you, Ada!");

    let spoken = h.spoken.lock().unwrap();
    assert_eq!(
        *spoken,
        vec![
            "Hi! What's your name?".to_string(),
            "Nice to meet you, Ada!".to_string(),
        ]
    );
    assert_eq!(h.plays.load(std::sync::atomic::Ordering::SeqCst), 2);
    assert!(!h.overlap.load(std::sync::atomic::Ordering::SeqCst));
}

#[tokio::test(start_paused = true)]
async fn test_final_utterance_just_before_probe_cancels_it() {
    let probe_ms = TurnTuning::default().silence_probe_ms;
    let mut h = harness(vec![reply(""), reply("Okay!")]);
    let cancel = h.controller.cancel_token();

    let script = async {
        wait_for_phase(&mut h.events, Phase::Listening).await;
        tokio::time::advance(Duration::from_millis(probe_ms - 1)).await;
        h.capture_tx
            .send(CaptureEvent::Final("hello".to_string()))
            .unwrap();
        wait_for_phase(&mut h.events, Phase::Listening).await;
        cancel.cancel();
    };
    let (outcome, ()) = tokio::join!(h.controller.run(), script);

    assert!(outcome.is_ok());
    let calls = h.dialogue.recorded();
    assert_eq!(calls.len(), 2, "no probe request may be issued");
    assert!(calls.iter().all(|call| !call.no_reply));
    assert_eq!(calls[1].user_text, "hello");
    assert_eq!(*h.spoken.lock().unwrap(), vec!["Okay!".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_silence_probe_speaks_when_dialogue_offers_text() {
    let mut h = harness(vec![reply(""), reply("Are you still there?")]);
    let cancel = h.controller.cancel_token();

    let script = async {
        wait_for_phase(&mut h.events, Phase::Listening).await;
        let text = wait_for_system_utterance(&mut h.events).await;
        assert_eq!(text, "Are you still there?");
        cancel.cancel();
    };
    let (outcome, ()) = tokio::join!(h.controller.run(), script);

    assert!(outcome.is_ok());
    let calls = h.dialogue.recorded();
    assert_eq!(calls.len(), 2);
    assert!(calls[1].no_reply);
    assert!(calls[1].user_text.is_empty());

    let history = h.controller.history();
    assert_eq!(history.len(), 1);
    assert_eq!(history.entries()[0].text, "Are you still there?");
}

#[tokio::test(start_paused = true)]
async fn test_declined_probe_returns_to_listening_silently() {
    let mut h = harness(vec![reply("")]);
    let cancel = h.controller.cancel_token();

    let script = async {
        wait_for_phase(&mut h.events, Phase::Listening).await;
        // Probe fires, dialogue says nothing, listening resumes.
        wait_for_phase(&mut h.events, Phase::Thinking).await;
        wait_for_phase(&mut h.events, Phase::Listening).await;
        cancel.cancel();
    };
    let (outcome, ()) = tokio::join!(h.controller.run(), script);

    assert!(outcome.is_ok());
    let calls = h.dialogue.recorded();
    assert_eq!(calls.len(), 2);
    assert!(calls[1].no_reply);
    assert!(h.controller.history().is_empty());
    assert!(h.spoken.lock().unwrap().is_empty());
    assert_eq!(h.plays.load(std::sync::atomic::Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_echo_of_system_speech_is_not_a_turn() {
    let mut h = harness(vec![
        reply("Great job, okay let's keep going!"),
        reply("Let's do it!"),
    ]);
    let cancel = h.controller.cancel_token();

    let script = async {
        wait_for_phase(&mut h.events, Phase::Listening).await;
        h.capture_tx
            .send(CaptureEvent::Final(
                "great job okay lets keep going".to_string(),
            ))
            .unwrap();
        h.capture_tx
            .send(CaptureEvent::Final("what is next".to_string()))
            .unwrap();
        let accepted = wait_for_user_utterance(&mut h.events).await;
        assert_eq!(accepted, "what is next");
        wait_for_phase(&mut h.events, Phase::Listening).await;
        cancel.cancel();
    };
    let (outcome, ()) = tokio::join!(h.controller.run(), script);

    assert!(outcome.is_ok());
    let calls = h.dialogue.recorded();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1].user_text, "what is next");

    let history = h.controller.history();
    assert_eq!(history.len(), 3);
    assert!(
        history
            .entries()
            .iter()
            .all(|utterance| utterance.text != "great job okay lets keep going")
    );
}

#[tokio::test(start_paused = true)]
async fn test_language_switch_restarts_capture_and_discards_trigger() {
    let mut h = harness(vec![reply("Hello!"), reply("Chào em!")]);
    let cancel = h.controller.cancel_token();

    let script = async {
        wait_for_phase(&mut h.events, Phase::Listening).await;
        h.capture_tx
            .send(CaptureEvent::Final("xin chào".to_string()))
            .unwrap();
        h.capture_tx
            .send(CaptureEvent::Final("em muốn học toán nhé".to_string()))
            .unwrap();
        let accepted = wait_for_user_utterance(&mut h.events).await;
        assert_eq!(accepted, "em muốn học toán nhé");
        wait_for_phase(&mut h.events, Phase::Listening).await;
        cancel.cancel();
    };
    let (outcome, ()) = tokio::join!(h.controller.run(), script);

    assert!(outcome.is_ok());
    assert_eq!(
        *h.capture_starts.lock().unwrap(),
        vec![Language::EnUs, Language::ViVn]
    );

    let calls = h.dialogue.recorded();
    assert_eq!(calls.len(), 2, "switch trigger must not reach the dialogue");
    assert_eq!(calls[1].language, Language::ViVn);
    assert_eq!(calls[1].user_text, "em muốn học toán nhé");

    let history = h.controller.history();
    assert_eq!(history.len(), 3);
    assert!(
        history
            .entries()
            .iter()
            .all(|utterance| utterance.text != "xin chào")
    );
    assert_eq!(h.controller.language(), Language::ViVn);
}

#[tokio::test(start_paused = true)]
async fn test_dialogue_failure_speaks_fallback_and_resumes_listening() {
    let mut h = harness(vec![
        reply("Hello!"),
        Err(Error::Dialogue("policy service returned 500".to_string())),
    ]);
    let cancel = h.controller.cancel_token();

    let script = async {
        wait_for_phase(&mut h.events, Phase::Listening).await;
        h.capture_tx
            .send(CaptureEvent::Final("tell me a story".to_string()))
            .unwrap();
        wait_for_phase(&mut h.events, Phase::Listening).await;
        cancel.cancel();
    };
    let (outcome, ()) = tokio::join!(h.controller.run(), script);

    assert!(outcome.is_ok());
    let spoken = h.spoken.lock().unwrap();
    assert_eq!(spoken.len(), 2);
    assert!(spoken[1].starts_with("Sorry"));

    // The apology is spoken but is not dialogue content.
    let history = h.controller.history();
    assert_eq!(history.len(), 2);
    assert_eq!(history.entries()[1].text, "tell me a story");
}

#[tokio::test(start_paused = true)]
async fn test_empty_reply_is_a_quiet_no_op() {
    let mut h = harness(vec![reply("Hello!"), reply("")]);
    let cancel = h.controller.cancel_token();

    let script = async {
        wait_for_phase(&mut h.events, Phase::Listening).await;
        h.capture_tx
            .send(CaptureEvent::Final("hmm".to_string()))
            .unwrap();
        wait_for_phase(&mut h.events, Phase::Thinking).await;
        wait_for_phase(&mut h.events, Phase::Listening).await;
        cancel.cancel();
    };
    let (outcome, ()) = tokio::join!(h.controller.run(), script);

    assert!(outcome.is_ok());
    assert_eq!(*h.spoken.lock().unwrap(), vec!["Hello!".to_string()]);
    assert_eq!(h.plays.load(std::sync::atomic::Ordering::SeqCst), 1);
    let history = h.controller.history();
    assert_eq!(history.len(), 2);
}

#[tokio::test]
async fn test_stop_twice_tears_down_once() {
    let mut h = harness(Vec::new());

    h.controller.stop().await;
    h.controller.stop().await;

    assert_eq!(h.controller.phase(), Phase::Stopped);
    assert_eq!(h.capture_stops.load(std::sync::atomic::Ordering::SeqCst), 1);

    // A stopped controller refuses to run again.
    assert!(h.controller.run().await.is_ok());
    assert!(h.capture_starts.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_seed_failure_falls_back_to_canned_opening() {
    let mut h = harness(vec![Err(Error::Dialogue("unreachable".to_string()))]);
    let cancel = h.controller.cancel_token();

    let script = async {
        let opening = wait_for_system_utterance(&mut h.events).await;
        assert!(opening.to_lowercase().contains("name"));
        cancel.cancel();
    };
    let (outcome, ()) = tokio::join!(h.controller.run(), script);

    assert!(outcome.is_ok());
    assert_eq!(h.dialogue.recorded().len(), 1);
    assert!(h.controller.history().is_empty());
    assert_eq!(h.plays.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_aborts_in_flight_dialogue_request() {
    let mut h = harness_with(ScriptedDialogue::hanging(vec![reply("Hello!")]));
    let cancel = h.controller.cancel_token();

    let script = async {
        wait_for_phase(&mut h.events, Phase::Listening).await;
        h.capture_tx
            .send(CaptureEvent::Final("hi".to_string()))
            .unwrap();
        wait_for_user_utterance(&mut h.events).await;
        // The dialogue request for this turn never resolves; the
        // cancel must unblock it without touching history.
        cancel.cancel();
    };
    let (outcome, ()) = tokio::join!(h.controller.run(), script);

    assert!(outcome.is_ok());
    assert_eq!(h.controller.phase(), Phase::Stopped);
    let history = h.controller.history();
    assert_eq!(history.len(), 2);
    assert_eq!(history.entries()[1].text, "hi");
    assert_eq!(*h.spoken.lock().unwrap(), vec!["Hello!".to_string()]);
}

/// The one true shared-resource rule: no reachable interleaving of
/// utterances, activity signals, and timer jumps may ever render
/// audio while capture is live.
#[tokio::test(start_paused = true)]
#[allow(clippy::cast_possible_truncation)]
async fn test_capture_and_playback_never_overlap() {
    let replies = (0..30)
        .map(|i| reply(&format!("Reply number {i}.")))
        .collect();
    let mut h = harness(replies);
    let cancel = h.controller.cancel_token();

    let script = async {
        wait_for_phase(&mut h.events, Phase::Listening).await;

        let mut state: u64 = 0x9E37_79B9_7F4A_7C15;
        let mut next = move || {
            state = state
                .wrapping_mul(6_364_136_223_846_793_005)
                .wrapping_add(1_442_695_040_888_963_407);
            (state >> 33) as u32
        };

        for i in 0..60 {
            match next() % 4 {
                0 => {
                    h.capture_tx
                        .send(CaptureEvent::Final(format!("utterance {i}")))
                        .unwrap();
                }
                1 => {
                    h.capture_tx.send(CaptureEvent::Activity).unwrap();
                }
                2 => {
                    tokio::time::advance(Duration::from_millis(u64::from(next() % 9000))).await;
                }
                _ => {
                    tokio::time::advance(Duration::from_millis(100)).await;
                }
            }
        }
        cancel.cancel();
    };
    let (outcome, ()) = tokio::join!(h.controller.run(), script);

    assert!(outcome.is_ok());
    assert!(
        !h.overlap.load(std::sync::atomic::Ordering::SeqCst),
        "playback ran while capture was live"
    );
    assert!(!h.capture_live.load(std::sync::atomic::Ordering::SeqCst));
    assert_eq!(h.controller.phase(), Phase::Stopped);
}
