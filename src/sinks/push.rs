use actix_ws::{CloseCode, CloseReason, Message, MessageStream, Session};
use tokio::sync::mpsc::Receiver;

use crate::pipeline::{LabelEvent, StopReason};

/// Close frame sent when the pipeline stops. Capture failures are reported as
/// errors so clients can tell them apart from an orderly shutdown.
pub fn close_reason_for(reason: &StopReason) -> CloseReason {
    match reason {
        StopReason::CaptureUnavailable(_) => CloseReason {
            code: CloseCode::Error,
            description: Some(reason.describe()),
        },
        StopReason::SourceExhausted | StopReason::Shutdown => CloseReason {
            code: CloseCode::Away,
            description: Some(reason.describe()),
        },
    }
}

/// Pushes each label as a text frame until the pipeline stops or the client
/// leaves. Client text and binary messages are ignored.
pub async fn run_session(
    mut session: Session,
    mut messages: MessageStream,
    mut labels: Receiver<LabelEvent>,
) {
    let close = loop {
        tokio::select! {
            event = labels.recv() => match event {
                Some(LabelEvent::Label { sequence, label }) => {
                    if session.text(label.as_str()).await.is_err() {
                        log::debug!("label socket closed before frame {sequence}");
                        return;
                    }
                }
                Some(LabelEvent::Stopped(reason)) => break Some(close_reason_for(&reason)),
                None => break Some(CloseCode::Away.into()),
            },
            message = messages.recv() => match message {
                Some(Ok(Message::Ping(payload))) => {
                    if session.pong(&payload).await.is_err() {
                        return;
                    }
                }
                Some(Ok(Message::Close(reason))) => break reason,
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    log::warn!("label socket protocol error: {err}");
                    break Some(CloseCode::Protocol.into());
                }
                None => return,
            },
        }
    };

    log::info!("label socket closing");
    let _ = session.close(close).await;
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use actix_web::{App, web};
    use awc::ws::{Frame, Message as ClientMessage};
    use futures_util::{SinkExt, StreamExt};

    use super::*;
    use crate::{
        pipeline::PipelineHub,
        server::{AppState, configure},
        types::ClassLabel,
    };

    fn serve(hub: Arc<PipelineHub>) -> actix_test::TestServer {
        let state = web::Data::new(AppState {
            hub,
            jpeg_quality: 80,
        });
        actix_test::start(move || App::new().app_data(state.clone()).configure(configure))
    }

    #[actix_web::test]
    async fn socket_pushes_labels_answers_pings_and_closes_on_capture_failure() {
        let hub = Arc::new(PipelineHub::new());
        let mut srv = serve(hub.clone());
        let mut socket = srv.ws_at("/ws").await.unwrap();
        assert_eq!(hub.status().push_subscribers, 1);

        socket
            .send(ClientMessage::Ping(web::Bytes::from_static(b"hi")))
            .await
            .unwrap();
        assert_eq!(
            socket.next().await.unwrap().unwrap(),
            Frame::Pong(web::Bytes::from_static(b"hi"))
        );

        hub.publish_label(1, ClassLabel::Sign("B"));
        hub.publish_label(2, ClassLabel::NoPrediction);
        assert_eq!(
            socket.next().await.unwrap().unwrap(),
            Frame::Text(web::Bytes::from_static(b"B"))
        );
        assert_eq!(
            socket.next().await.unwrap().unwrap(),
            Frame::Text(web::Bytes::from_static(b"No Prediction"))
        );

        hub.stop(StopReason::CaptureUnavailable("camera 0 unplugged".into()));
        match socket.next().await.unwrap().unwrap() {
            Frame::Close(Some(reason)) => {
                assert_eq!(reason.code, CloseCode::Error);
                assert_eq!(
                    reason.description.as_deref(),
                    Some("capture unavailable: camera 0 unplugged")
                );
            }
            other => panic!("expected close frame, got {other:?}"),
        }
    }

    #[actix_web::test]
    async fn socket_opened_after_shutdown_closes_immediately() {
        let hub = Arc::new(PipelineHub::new());
        hub.stop(StopReason::Shutdown);
        let mut srv = serve(hub);
        let mut socket = srv.ws_at("/ws").await.unwrap();

        match socket.next().await.unwrap().unwrap() {
            Frame::Close(Some(reason)) => assert_eq!(reason.code, CloseCode::Away),
            other => panic!("expected close frame, got {other:?}"),
        }
    }

    #[test]
    fn capture_failure_closes_with_error() {
        let reason = close_reason_for(&StopReason::CaptureUnavailable("no frame for 5s".into()));
        assert_eq!(reason.code, CloseCode::Error);
        assert_eq!(
            reason.description.as_deref(),
            Some("capture unavailable: no frame for 5s")
        );
    }

    #[test]
    fn orderly_stops_close_as_going_away() {
        for stop in [StopReason::Shutdown, StopReason::SourceExhausted] {
            assert_eq!(close_reason_for(&stop).code, CloseCode::Away);
        }
    }
}
