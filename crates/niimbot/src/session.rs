//! Print session state machine.
//!
//! One [`PrintSession`] drives one [`PrintJob`] against one device:
//! connect, configure, begin, stream every page, finish, then wait for the
//! printer to confirm completion. Every command goes through a single
//! exchange point that rejects anything the current state does not permit,
//! and the connection is released on every exit path.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::bitmap;
use crate::config::SessionConfig;
use crate::job::PrintJob;
use crate::protocol::status::PrintStatus;
use crate::protocol::{Command, CompletionStrategy, ModelProfile, Packet};
use crate::transport::{self, ReadPolicy, Transport};
use crate::{FailReason, NiimbotError, Result};

/// Lifecycle of a print session. `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connected,
    Configuring,
    PageActive,
    Transmitting,
    PageEnded,
    Finishing,
    CompletionPending,
    Completed,
    Failed(FailReason),
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Completed | SessionState::Failed(_))
    }

    /// Whether `command` may be sent in this state. Page setup is only legal
    /// once BeginPrint has gone out.
    fn permits(self, command: Command, print_begun: bool) -> bool {
        use Command::*;
        match self {
            SessionState::Connected => {
                matches!(command, SetDensity | SetLabelType | Heartbeat | GetInfo)
            }
            SessionState::Configuring if print_begun => {
                matches!(command, Clear | BeginPage | SetPageSize | SetQuantity)
            }
            SessionState::Configuring => command == BeginPrint,
            SessionState::PageActive | SessionState::Transmitting => command == BitmapLine,
            SessionState::PageEnded => command == EndPage,
            SessionState::Finishing => command == EndPrint,
            SessionState::CompletionPending => matches!(command, QueryStatus | EndPrint),
            SessionState::Disconnected | SessionState::Completed | SessionState::Failed(_) => {
                false
            }
        }
    }
}

/// Progress reported by the printer while a job finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrintProgress {
    pub page: u16,
    pub print_percent: u8,
    pub feed_percent: u8,
}

impl From<PrintStatus> for PrintProgress {
    fn from(status: PrintStatus) -> Self {
        Self {
            page: status.page,
            print_percent: status.print_percent,
            feed_percent: status.feed_percent,
        }
    }
}

/// Summary of a completed job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrintReport {
    pub model: &'static str,
    /// Pages the printer confirmed (pages × copies).
    pub pages: u16,
    pub lines_sent: usize,
    pub elapsed: Duration,
}

type ProgressCallback = Box<dyn FnMut(PrintProgress) + Send>;

/// Drives one print job on one device. Not reusable once terminal.
pub struct PrintSession<T: Transport> {
    transport: T,
    address: String,
    profile: ModelProfile,
    config: SessionConfig,
    state: SessionState,
    print_begun: bool,
    progress: Option<ProgressCallback>,
    cancel: CancellationToken,
}

impl<T: Transport> PrintSession<T> {
    /// Bind a transport to `address` using the profile for `model_identifier`.
    ///
    /// Unknown models are rejected here, before any I/O.
    pub fn new(
        transport: T,
        address: impl Into<String>,
        model_identifier: &str,
        config: SessionConfig,
    ) -> Result<Self> {
        let profile = ModelProfile::resolve(model_identifier)?;
        Ok(Self {
            transport,
            address: address.into(),
            profile,
            config,
            state: SessionState::Disconnected,
            print_begun: false,
            progress: None,
            cancel: CancellationToken::new(),
        })
    }

    /// Builder: receive `(page, print%, feed%)` updates during the completion poll.
    pub fn with_progress(mut self, callback: impl FnMut(PrintProgress) + Send + 'static) -> Self {
        self.progress = Some(Box::new(callback));
        self
    }

    /// Token that aborts [`run`](Self::run) when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn profile(&self) -> &ModelProfile {
        &self.profile
    }

    /// Print `job` and wait for the printer to confirm it.
    ///
    /// Input errors and a busy device fail before any BLE I/O. Once connected,
    /// the transport is disconnected on success, failure and cancellation.
    pub async fn run(&mut self, job: PrintJob) -> Result<PrintReport> {
        if self.state != SessionState::Disconnected {
            return Err(NiimbotError::Protocol(format!(
                "session already ran (state {:?}); create a new session per job",
                self.state
            )));
        }

        if let Err(err) = job.validate(&self.profile) {
            return Err(self.fail(err));
        }
        let _guard = match self.config.locks.try_acquire(&self.address) {
            Ok(guard) => guard,
            Err(err) => return Err(self.fail(err)),
        };

        tracing::info!(
            address = %self.address,
            model = self.profile.name,
            pages = job.pages().len(),
            copies = job.quantity,
            "Starting print job"
        );

        let started = Instant::now();
        let result = self.drive(&job, started).await;
        self.transport.disconnect().await;

        match result {
            Ok(report) => {
                self.transition(SessionState::Completed);
                tracing::info!(
                    address = %self.address,
                    pages = report.pages,
                    elapsed_ms = report.elapsed.as_millis() as u64,
                    "Print job completed"
                );
                Ok(report)
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    async fn drive(&mut self, job: &PrintJob, started: Instant) -> Result<PrintReport> {
        let token = self.cancel.clone();
        cancellable(
            &token,
            self.transport
                .connect(&self.address, self.config.connect_timeout),
        )
        .await?;
        self.transition(SessionState::Connected);

        self.send(Command::SetDensity, [job.density]).await?;
        self.send(Command::SetLabelType, [self.config.label_type]).await?;

        self.transition(SessionState::Configuring);
        let total_pages = job.total_pages();
        self.send(
            Command::BeginPrint,
            self.profile.begin_print_payload(total_pages),
        )
        .await?;
        self.print_begun = true;

        let mut lines_sent = 0;
        let pages = job.pages();
        for (index, page) in pages.iter().enumerate() {
            tracing::debug!(page = index + 1, of = pages.len(), "Configuring page");
            if self.profile.has_clear_command {
                self.send(Command::Clear, [0x01]).await?;
            }
            self.send(Command::BeginPage, [0x01]).await?;

            let (height, width) = job.page_size_px(page);
            for packet in self.profile.page_size_packets(height, width, job.quantity)? {
                let command = Command::from_code(packet.command()).ok_or_else(|| {
                    NiimbotError::Protocol(format!("unknown command {:#04x}", packet.command()))
                })?;
                self.exchange(command, &packet, self.config.read_timeout)
                    .await?;
            }

            self.transition(SessionState::PageActive);
            for line in bitmap::encode(page, self.profile.max_width_px)? {
                if self.state == SessionState::PageActive {
                    self.transition(SessionState::Transmitting);
                }
                self.send(Command::BitmapLine, line).await?;
                lines_sent += 1;
            }

            self.transition(SessionState::PageEnded);
            self.send(Command::EndPage, [0x01]).await?;
            if index + 1 < pages.len() {
                self.transition(SessionState::Configuring);
            }
        }

        self.transition(SessionState::Finishing);
        let end_ack = self.send(Command::EndPrint, Vec::<u8>::new()).await?;
        self.transition(SessionState::CompletionPending);

        let pages = match self.profile.completion_strategy {
            CompletionStrategy::StatusPoll => self.poll_status(total_pages).await?,
            CompletionStrategy::EndAck => self.await_end_ack(end_ack, total_pages).await?,
        };

        Ok(PrintReport {
            model: self.profile.name,
            pages,
            lines_sent,
            elapsed: started.elapsed(),
        })
    }

    /// QueryStatus every poll interval until the printer reports all pages
    /// printed and fed, or the completion timeout passes.
    async fn poll_status(&mut self, total_pages: u16) -> Result<u16> {
        let deadline = Instant::now() + self.config.completion_timeout;
        let mut polls = 0u32;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                tracing::warn!(polls, total_pages, "Printer never reported completion");
                return Err(NiimbotError::PrintTimeout(self.config.completion_timeout));
            }

            polls += 1;
            let packet = Command::QueryStatus.packet([0x01])?;
            let timeout = self.config.read_timeout.min(remaining);
            match self.exchange(Command::QueryStatus, &packet, timeout).await {
                Ok(Some(reply)) => match PrintStatus::parse(&reply) {
                    Some(status) => {
                        tracing::debug!(
                            poll = polls,
                            page = status.page,
                            print = status.print_percent,
                            feed = status.feed_percent,
                            "Print status"
                        );
                        self.report_progress(status.into());
                        if status.is_complete(total_pages) {
                            return Ok(status.page);
                        }
                    }
                    None => tracing::debug!(poll = polls, "Short status reply"),
                },
                Ok(None) => {}
                Err(NiimbotError::Timeout(_)) => {
                    tracing::debug!(poll = polls, "No status this round");
                }
                Err(err) => return Err(err),
            }

            self.pause_until_next_poll(deadline).await?;
        }
    }

    /// Re-send EndPrint every poll interval until its acknowledgement
    /// reports the job done.
    async fn await_end_ack(&mut self, first: Option<Packet>, total_pages: u16) -> Result<u16> {
        let deadline = Instant::now() + self.config.completion_timeout;
        let mut reply = first;

        loop {
            if reply.as_ref().is_some_and(end_acknowledged) {
                return Ok(total_pages);
            }
            self.pause_until_next_poll(deadline).await?;

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(NiimbotError::PrintTimeout(self.config.completion_timeout));
            }
            let packet = Command::EndPrint.packet(Vec::<u8>::new())?;
            let timeout = self.config.read_timeout.min(remaining);
            reply = match self.exchange(Command::EndPrint, &packet, timeout).await {
                Ok(reply) => reply,
                Err(NiimbotError::Timeout(_)) => None,
                Err(err) => return Err(err),
            };
        }
    }

    /// Sleep one poll interval, never past `deadline`.
    async fn pause_until_next_poll(&self, deadline: Instant) -> Result<()> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let pause = self.config.poll_interval.min(remaining);
        cancellable(&self.cancel, async {
            tokio::time::sleep(pause).await;
            Ok(())
        })
        .await
    }

    async fn send(
        &mut self,
        command: Command,
        payload: impl Into<Vec<u8>>,
    ) -> Result<Option<Packet>> {
        let packet = command.packet(payload)?;
        self.exchange(command, &packet, self.config.read_timeout)
            .await
    }

    /// The only place packets leave the session.
    async fn exchange(
        &mut self,
        command: Command,
        packet: &Packet,
        timeout: Duration,
    ) -> Result<Option<Packet>> {
        if !self.state.permits(command, self.print_begun) {
            return Err(NiimbotError::Protocol(format!(
                "{command} not permitted in state {:?}",
                self.state
            )));
        }

        let token = self.cancel.clone();
        if !command.expects_response() {
            cancellable(&token, transport::send(&mut self.transport, packet)).await?;
            return Ok(None);
        }

        let policy = ReadPolicy {
            timeout,
            max_corrupt: self.config.max_checksum_failures,
        };
        let reply = cancellable(
            &token,
            transport::request(&mut self.transport, packet, policy),
        )
        .await?;
        tracing::trace!(
            command = %command,
            reply = format_args!("{:#04x}", reply.command()),
            "Acknowledged"
        );
        Ok(Some(reply))
    }

    fn report_progress(&mut self, progress: PrintProgress) {
        if let Some(callback) = self.progress.as_mut() {
            callback(progress);
        }
    }

    fn transition(&mut self, next: SessionState) {
        tracing::debug!(from = ?self.state, to = ?next, "Session state");
        self.state = next;
    }

    fn fail(&mut self, err: NiimbotError) -> NiimbotError {
        let reason = err.fail_reason();
        tracing::warn!(address = %self.address, reason = ?reason, error = %err, "Print job failed");
        self.transition(SessionState::Failed(reason));
        err
    }
}

fn end_acknowledged(reply: &Packet) -> bool {
    reply.payload().first().is_some_and(|&b| b != 0)
}

/// Run `fut` unless `token` is cancelled first.
async fn cancellable<R>(
    token: &CancellationToken,
    fut: impl Future<Output = Result<R>>,
) -> Result<R> {
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(NiimbotError::Cancelled),
        result = fut => result,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::bitmap::MonoImage;
    use crate::lock::DeviceLocks;
    use crate::transport::fake::{FakeTransport, ack, status};

    const ADDR: &str = "AA:BB:CC:DD:EE:FF";

    fn image(width: u16, height: u16) -> MonoImage {
        let pixels = (0..usize::from(width) * usize::from(height))
            .map(|i| (i % 3 == 0) as u8)
            .collect();
        MonoImage::from_pixels(width, height, pixels).unwrap()
    }

    fn config() -> SessionConfig {
        SessionConfig::default().with_locks(DeviceLocks::new())
    }

    fn session(fake: FakeTransport, model: &str) -> PrintSession<FakeTransport> {
        PrintSession::new(fake, ADDR, model, config()).unwrap()
    }

    #[tokio::test]
    async fn page_size_rejected_before_begin_print() {
        let fake = FakeTransport::healthy(1);
        let log = fake.log();
        let mut s = session(fake, "b1");

        let err = s.send(Command::SetPageSize, [0, 8, 0, 8, 0, 1]).await.unwrap_err();
        assert!(matches!(err, NiimbotError::Protocol(_)));

        s.state = SessionState::Connected;
        let err = s.send(Command::SetPageSize, [0, 8, 0, 8, 0, 1]).await.unwrap_err();
        assert!(matches!(err, NiimbotError::Protocol(_)));

        s.state = SessionState::Configuring;
        let err = s.send(Command::SetPageSize, [0, 8, 0, 8, 0, 1]).await.unwrap_err();
        assert!(matches!(err, NiimbotError::Protocol(_)));

        assert!(log.lock().unwrap().writes.is_empty());
    }

    #[test]
    fn permitted_commands_follow_lifecycle() {
        assert!(SessionState::Connected.permits(Command::SetDensity, false));
        assert!(!SessionState::Connected.permits(Command::BeginPrint, false));
        assert!(SessionState::Configuring.permits(Command::BeginPrint, false));
        assert!(!SessionState::Configuring.permits(Command::BeginPrint, true));
        assert!(SessionState::Configuring.permits(Command::Clear, true));
        assert!(!SessionState::Transmitting.permits(Command::EndPage, true));
        assert!(SessionState::PageEnded.permits(Command::EndPage, true));
        assert!(!SessionState::Completed.permits(Command::QueryStatus, true));
    }

    #[tokio::test]
    async fn b1_job_command_order() {
        let fake = FakeTransport::healthy(1);
        let log = fake.log();
        let mut s = session(fake, "b1");

        let report = s.run(PrintJob::new(image(16, 2))).await.unwrap();
        assert_eq!(s.state(), SessionState::Completed);
        assert_eq!(report.pages, 1);
        assert_eq!(report.lines_sent, 2);

        let log = log.lock().unwrap();
        assert_eq!(
            log.commands(),
            vec![0x21, 0x23, 0x01, 0x03, 0x13, 0x85, 0x85, 0xe3, 0xf3, 0xa3]
        );
        assert_eq!(log.writes[0].payload(), vec![3]);
        assert_eq!(log.writes[2].payload(), vec![0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00]);
        assert_eq!(log.writes[4].payload(), vec![0x00, 0x02, 0x00, 0x10, 0x00, 0x01]);
        // Rows are padded to the 384 px head: 6 header bytes + 48 data bytes.
        assert_eq!(log.writes[5].payload().len(), 54);
        assert_eq!(log.writes[6].payload()[..2], [0x00, 0x01]);
        assert_eq!(log.disconnects, 1);
    }

    #[tokio::test]
    async fn d110_job_clears_and_sets_quantity() {
        let fake = FakeTransport::healthy(2);
        let log = fake.log();
        let mut s = session(fake, "d110");

        s.run(PrintJob::new(image(16, 2)).with_quantity(2))
            .await
            .unwrap();

        let log = log.lock().unwrap();
        assert_eq!(
            log.commands(),
            vec![0x21, 0x23, 0x01, 0x20, 0x03, 0x13, 0x15, 0x85, 0x85, 0xe3, 0xf3, 0xa3]
        );
        assert_eq!(log.writes[2].payload(), vec![0x01]);
        assert_eq!(log.writes[5].payload(), vec![0x00, 0x02, 0x00, 0x10]);
        assert_eq!(log.writes[6].payload(), vec![0x00, 0x02]);
        assert_eq!(log.writes[7].payload().len(), 6 + 30);
    }

    #[tokio::test]
    async fn multi_page_job_counts_pages_times_copies() {
        let fake = FakeTransport::healthy(4);
        let log = fake.log();
        let mut s = session(fake, "b1");

        let job = PrintJob::new(image(8, 1))
            .with_page(image(8, 1))
            .with_quantity(2)
            .with_label_size_mm(40.0, 12.0);
        let report = s.run(job).await.unwrap();
        assert_eq!(report.pages, 4);

        let log = log.lock().unwrap();
        assert_eq!(log.writes[2].payload()[..2], [0x00, 0x04]);
        let begin_pages = log.commands().iter().filter(|&&c| c == 0x03).count();
        assert_eq!(begin_pages, 2);
        let size = log.writes.iter().find(|p| p.command() == 0x13).unwrap();
        // 12mm high, 40mm wide, two copies.
        assert_eq!(size.payload(), vec![0x00, 96, 0x01, 0x40, 0x00, 0x02]);
    }

    #[tokio::test(start_paused = true)]
    async fn completes_on_fifth_poll() {
        let mut polls = 0;
        let fake = FakeTransport::new(move |p| {
            if p.command() != Command::QueryStatus.code() {
                return ack(p);
            }
            polls += 1;
            if polls == 5 {
                vec![status(1, 100, 100)]
            } else {
                vec![status(0, 20 * polls as u8, 0)]
            }
        });
        let log = fake.log();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut s = session(fake, "b1").with_progress(move |p| sink.lock().unwrap().push(p));

        let started = Instant::now();
        s.run(PrintJob::new(image(8, 4))).await.unwrap();

        assert_eq!(s.state(), SessionState::Completed);
        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(started.elapsed(), Duration::from_millis(4 * 300));

        let queries = log.lock().unwrap().commands().iter().filter(|&&c| c == 0xa3).count();
        assert_eq!(queries, 5);
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 5);
        assert_eq!(
            seen.last(),
            Some(&PrintProgress { page: 1, print_percent: 100, feed_percent: 100 })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_printer_times_out() {
        let fake = FakeTransport::new(|p| {
            if p.command() == Command::QueryStatus.code() {
                vec![status(0, 50, 0)]
            } else {
                ack(p)
            }
        });
        let log = fake.log();
        let mut s = session(fake, "b1");

        let started = Instant::now();
        let err = s.run(PrintJob::new(image(8, 4))).await.unwrap_err();
        let elapsed = started.elapsed();

        assert!(matches!(err, NiimbotError::PrintTimeout(d) if d == Duration::from_secs(10)));
        assert_eq!(s.state(), SessionState::Failed(FailReason::PrintTimeout));
        assert!(elapsed >= Duration::from_secs(10));
        assert!(elapsed <= Duration::from_secs(10) + Duration::from_millis(300));
        assert_eq!(log.lock().unwrap().disconnects, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_status_channel_times_out() {
        let fake = FakeTransport::new(|p| {
            if p.command() == Command::QueryStatus.code() {
                Vec::new()
            } else {
                ack(p)
            }
        });
        let mut s = session(fake, "b1");

        let started = Instant::now();
        let err = s.run(PrintJob::new(image(8, 1))).await.unwrap_err();
        assert!(matches!(err, NiimbotError::PrintTimeout(_)));
        assert!(started.elapsed() <= Duration::from_secs(10) + Duration::from_millis(300));
    }

    #[tokio::test]
    async fn busy_device_is_rejected_without_io() {
        let locks = DeviceLocks::new();
        let _active = locks.try_acquire(ADDR).unwrap();

        let fake = FakeTransport::healthy(1);
        let log = fake.log();
        let cfg = SessionConfig::default().with_locks(locks.clone());
        let mut s = PrintSession::new(fake, "aa:bb:cc:dd:ee:ff", "b1", cfg).unwrap();

        let err = s.run(PrintJob::new(image(8, 1))).await.unwrap_err();
        assert!(matches!(err, NiimbotError::DeviceBusy(_)));
        assert_eq!(s.state(), SessionState::Failed(FailReason::DeviceBusy));
        assert!(!log.lock().unwrap().io_attempted());
    }

    #[tokio::test]
    async fn lock_is_released_after_the_job() {
        let locks = DeviceLocks::new();
        let cfg = SessionConfig::default().with_locks(locks.clone());
        let mut s = PrintSession::new(FakeTransport::healthy(1), ADDR, "b1", cfg).unwrap();

        s.run(PrintJob::new(image(8, 1))).await.unwrap();
        assert!(!locks.is_held(ADDR));
    }

    #[tokio::test]
    async fn input_errors_fail_before_io() {
        let fake = FakeTransport::healthy(1);
        let log = fake.log();
        assert!(matches!(
            PrintSession::new(fake, ADDR, "q1", config()),
            Err(NiimbotError::UnknownModel(_))
        ));
        assert!(!log.lock().unwrap().io_attempted());

        let fake = FakeTransport::healthy(1);
        let log = fake.log();
        let mut s = session(fake, "d110");
        let err = s.run(PrintJob::new(image(300, 2))).await.unwrap_err();
        assert!(matches!(err, NiimbotError::LabelTooWide { width: 300, max: 240 }));
        assert_eq!(s.state(), SessionState::Failed(FailReason::InvalidInput));
        assert!(!log.lock().unwrap().io_attempted());
    }

    #[tokio::test]
    async fn write_failure_disconnects() {
        let mut fake = FakeTransport::healthy(1);
        fake.fail_write_at = Some(5);
        let log = fake.log();
        let mut s = session(fake, "b1");

        let err = s.run(PrintJob::new(image(8, 3))).await.unwrap_err();
        assert!(matches!(err, NiimbotError::Write(_)));
        assert_eq!(s.state(), SessionState::Failed(FailReason::Transport));

        let log = log.lock().unwrap();
        assert_eq!(log.writes.len(), 6);
        assert_eq!(log.disconnects, 1);
    }

    #[tokio::test]
    async fn connect_failure_is_transport_error() {
        let mut fake = FakeTransport::healthy(1);
        fake.connect_error = Some(crate::ConnectionError::Rejected("in use".into()));
        let log = fake.log();
        let mut s = session(fake, "b1");

        let err = s.run(PrintJob::new(image(8, 1))).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(s.state(), SessionState::Failed(FailReason::Transport));
        assert!(log.lock().unwrap().writes.is_empty());
    }

    #[tokio::test]
    async fn printer_error_fails_with_protocol() {
        let fake = FakeTransport::new(|p| {
            if p.command() == Command::BeginPrint.code() {
                vec![Packet::new(0xdb, vec![0x06]).unwrap().encode()]
            } else {
                ack(p)
            }
        });
        let log = fake.log();
        let mut s = session(fake, "b1");

        let err = s.run(PrintJob::new(image(8, 1))).await.unwrap_err();
        assert!(matches!(err, NiimbotError::Protocol(_)));
        assert_eq!(s.state(), SessionState::Failed(FailReason::Protocol));
        let log = log.lock().unwrap();
        assert_eq!(log.commands(), vec![0x21, 0x23, 0x01]);
        assert_eq!(log.disconnects, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_disconnects_and_fails() {
        let fake = FakeTransport::new(|p| {
            if p.command() == Command::QueryStatus.code() {
                vec![status(0, 10, 0)]
            } else {
                ack(p)
            }
        });
        let log = fake.log();
        let mut s = session(fake, "b1");

        let token = s.cancel_token();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            token.cancel();
        });

        let started = Instant::now();
        let err = s.run(PrintJob::new(image(8, 1))).await.unwrap_err();
        assert!(matches!(err, NiimbotError::Cancelled));
        assert_eq!(s.state(), SessionState::Failed(FailReason::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(log.lock().unwrap().disconnects, 1);
    }

    #[tokio::test]
    async fn session_is_not_reusable() {
        let mut s = session(FakeTransport::healthy(1), "b1");
        s.run(PrintJob::new(image(8, 1))).await.unwrap();
        let err = s.run(PrintJob::new(image(8, 1))).await.unwrap_err();
        assert!(matches!(err, NiimbotError::Protocol(_)));
        assert_eq!(s.state(), SessionState::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn end_ack_strategy_repeats_end_print() {
        let mut end_prints = 0;
        let fake = FakeTransport::new(move |p| {
            if p.command() != Command::EndPrint.code() {
                return ack(p);
            }
            end_prints += 1;
            let done = u8::from(end_prints >= 3);
            vec![Packet::new(0xf4, vec![done]).unwrap().encode()]
        });
        let log = fake.log();
        let mut s = session(fake, "d110");
        s.profile.completion_strategy = CompletionStrategy::EndAck;

        let report = s.run(PrintJob::new(image(8, 1))).await.unwrap();
        assert_eq!(report.pages, 1);

        let log = log.lock().unwrap();
        let ends = log.commands().iter().filter(|&&c| c == 0xf3).count();
        assert_eq!(ends, 3);
        assert!(!log.commands().contains(&0xa3));
    }
}
