//! The single consumer of the submission queue.
//!
//! The worker owns the SMTP connection. It is either `Idle` (no connection)
//! or `Open`. The first message of a submission arriving while idle triggers
//! a dial; a failed dial is logged and the submission's remaining messages
//! are only written to the activity log. A submission that produced no
//! messages never dials. An open session is reused until it has been unused
//! for the idle timeout, then closed. A failed send keeps the session only
//! while the connection is still usable; a broken one is dropped and the
//! next message dials again.
//!
//! Messages go out strictly in arrival order, one transaction at a time.

use std::{sync::Arc, time::Duration};

use mailout_common::{internal, maillog::MailLog, outgoing};
use tokio::sync::mpsc;

use crate::{
    composer::MessageComposer,
    submission::Submission,
    transport::{Session, Transport},
};

enum State<S> {
    Idle,
    Open(S),
}

/// Sequential SMTP sender fed by the submission queue.
#[derive(Debug)]
pub struct SessionWorker<T> {
    transport: Arc<T>,
    composer: Arc<MessageComposer>,
    maillog: Arc<MailLog>,
    idle_timeout: Duration,
}

impl<T> Clone for SessionWorker<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            composer: Arc::clone(&self.composer),
            maillog: Arc::clone(&self.maillog),
            idle_timeout: self.idle_timeout,
        }
    }
}

impl<T: Transport> SessionWorker<T> {
    pub const fn new(
        transport: Arc<T>,
        composer: Arc<MessageComposer>,
        maillog: Arc<MailLog>,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            composer,
            maillog,
            idle_timeout,
        }
    }

    pub const fn maillog(&self) -> &Arc<MailLog> {
        &self.maillog
    }

    /// Process submissions until the queue is closed and drained.
    pub async fn run(&self, queue: &mut mpsc::Receiver<Submission>) {
        internal!(level = INFO, "Session worker started");
        let mut state = State::Idle;

        loop {
            let next = if matches!(state, State::Open(_)) {
                if let Ok(next) = tokio::time::timeout(self.idle_timeout, queue.recv()).await {
                    next
                } else {
                    outgoing!(
                        level = DEBUG,
                        "No mail for {:?}, closing SMTP session",
                        self.idle_timeout
                    );
                    close(&mut state).await;
                    continue;
                }
            } else {
                queue.recv().await
            };

            let Some(submission) = next else {
                close(&mut state).await;
                internal!(level = INFO, "Submission queue closed, session worker exiting");
                return;
            };

            state = self.process(state, &submission).await;
        }
    }

    async fn process(
        &self,
        state: State<T::Session>,
        submission: &Submission,
    ) -> State<T::Session> {
        let messages = self.composer.build(submission);

        let mut session = match state {
            State::Open(session) => Some(session),
            State::Idle => None,
        };
        let mut dial_failed = false;

        for message in &messages {
            let (envelope, email) = match message.to_wire() {
                Ok(wire) => wire,
                Err(e) => {
                    self.maillog.record(
                        format!(
                            "To: {}\r\nSubject: {}\r\n\r\nCannot build message: {e}\r\n",
                            message.to.join(", "),
                            message.subject
                        )
                        .as_bytes(),
                    );
                    self.maillog
                        .error(format_args!("Cannot build message to {:?}: {e}", message.to));
                    continue;
                }
            };

            self.maillog.record(&email);
            let recipients = envelope
                .to()
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ");

            if session.is_none() && !dial_failed {
                match self.transport.dial().await {
                    Ok(dialed) => session = Some(dialed),
                    Err(e) => {
                        self.maillog.error(format_args!("Dial Error: {e}"));
                        dial_failed = true;
                    }
                }
            }

            let Some(active) = session.as_mut() else {
                continue;
            };

            match active.send(&envelope, &email).await {
                Ok(()) => outgoing!(
                    level = INFO,
                    encrypted = message.is_encrypted(),
                    "Sent message to {recipients}"
                ),
                Err(e) => {
                    self.maillog
                        .error(format_args!("Send Error to {recipients}: {e}"));
                    if active.is_broken() {
                        outgoing!(level = WARN, "SMTP session broken, dropping it");
                        session = None;
                    }
                }
            }
        }

        session.map_or(State::Idle, State::Open)
    }
}

async fn close<S: Session>(state: &mut State<S>) {
    if let State::Open(mut session) = std::mem::replace(state, State::Idle) {
        session.close().await;
    }
}
