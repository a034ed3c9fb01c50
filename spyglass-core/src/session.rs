//! Session orchestration: connect → handshake → authenticate →
//! initialize → steady state → shutdown.
//!
//! A [`Session`] owns the whole lifecycle. `connect()` runs the RFB 3.3
//! setup sequence inline, then spawns the sender and receiver loops as
//! independent tasks that communicate only through the outbound queue
//! and the shared [`ScreenDescription`]. Either loop's fatal error
//! lowers the shared alive flag; `shutdown()` additionally aborts both
//! tasks so a read blocked on a dead socket cannot outlive the session.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::task::{AbortHandle, JoinError, JoinHandle};
use tracing::{debug, info, warn};

use crate::auth;
use crate::error::RfbError;
use crate::message::{self, auth_result, security};
use crate::phase::SessionPhase;
use crate::receiver::PacketReceiver;
use crate::screen::{PIXEL_FORMAT_LEN, PixelFormat, ScreenDescription};
use crate::sender::{PacketSender, SenderHandle};
use crate::sink::RenderSink;
use crate::stream::{IoSink, IoSource, ReadStream, WriteStream};
use crate::tls::{TLS_BUFFER_CAPACITY, TlsOptions, TlsTunnel};
use crate::tunnel::{self, TunnelOptions};

/// Client-init flag requesting exclusive access to the console.
const CLIENT_INIT_EXCLUSIVE: u8 = 0;

/// Sanity cap on server-supplied reason / desktop-name strings.
const MAX_SERVER_STRING: usize = 4096;

// ── ConnectOptions ───────────────────────────────────────────────

/// Everything needed to reach and authenticate one console.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// VNC server host.
    pub host: String,
    /// VNC server port.
    pub port: u16,
    /// Password for VNC authentication, when the server demands it.
    pub password: Option<String>,
    /// When set, the whole protocol runs inside a TLS tunnel.
    pub tls: Option<TlsOptions>,
    /// When set, the server is reached through an HTTP CONNECT tunnel
    /// instead of a direct socket.
    pub tunnel: Option<TunnelOptions>,
    /// TCP (and tunnel) connect deadline.
    pub connect_timeout: Duration,
}

impl ConnectOptions {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            password: None,
            tls: None,
            tunnel: None,
            connect_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_tls(mut self, tls: TlsOptions) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn with_tunnel(mut self, tunnel: TunnelOptions) -> Self {
        self.tunnel = Some(tunnel);
        self
    }
}

// ── Session ──────────────────────────────────────────────────────

/// A live console session.
#[derive(Debug)]
pub struct Session {
    screen: Arc<ScreenDescription>,
    sender: SenderHandle,
    alive: Arc<AtomicBool>,
    phase: Mutex<SessionPhase>,
    closed: AtomicBool,
    sender_task: Option<JoinHandle<Result<(), RfbError>>>,
    receiver_task: Option<JoinHandle<Result<(), RfbError>>>,
    sender_abort: AbortHandle,
    receiver_abort: AbortHandle,
}

impl Session {
    /// Open a console session: connect, run the RFB setup sequence, and
    /// start the protocol loops.
    pub async fn connect(
        options: ConnectOptions,
        mut sink: Box<dyn RenderSink>,
    ) -> Result<Self, RfbError> {
        let mut phase = SessionPhase::Connecting;

        let stream = match &options.tunnel {
            Some(tunnel) => {
                tunnel::open(tunnel, &options.host, options.port, options.connect_timeout).await?
            }
            None => {
                let addr = format!("{}:{}", options.host, options.port);
                tokio::time::timeout(options.connect_timeout, TcpStream::connect(&addr))
                    .await
                    .map_err(|_| RfbError::Timeout(options.connect_timeout))??
            }
        };
        stream.set_nodelay(true)?;
        debug!(host = %options.host, port = options.port, "connected");

        let (read_half, write_half) = stream.into_split();
        let mut input = ReadStream::new(Box::new(IoSource(read_half)));
        let mut output = WriteStream::new(Box::new(IoSink(write_half)));

        // TLS, when required, wraps the session before the first
        // protocol byte; the streams are replaced, not mutated.
        if let Some(tls) = &options.tls {
            let (reader, writer) =
                TlsTunnel::establish(&options.host, tls, input, output).await?;
            input = ReadStream::with_capacity(Box::new(reader), TLS_BUFFER_CAPACITY);
            output = WriteStream::with_capacity(Box::new(writer), TLS_BUFFER_CAPACITY);
        }

        phase.begin_handshake()?;
        Self::exchange_versions(&mut input, &mut output).await?;

        phase.begin_authentication()?;
        Self::authenticate(&mut input, &mut output, options.password.as_deref()).await?;

        phase.begin_initialization()?;
        let screen = Arc::new(ScreenDescription::new());
        Self::initialize(&mut input, &mut output, &screen).await?;

        phase.activate()?;
        info!(
            width = screen.width(),
            height = screen.height(),
            desktop = %screen.desktop_name(),
            "console session active"
        );
        // The sink sees the negotiated size before any rectangle.
        sink.resize(screen.width().max(0) as u16, screen.height().max(0) as u16);

        let alive = Arc::new(AtomicBool::new(true));
        let (mut packet_sender, sender) =
            PacketSender::new(output, Arc::clone(&screen), Arc::clone(&alive))?;
        let mut packet_receiver = PacketReceiver::new(
            input,
            sink,
            Arc::clone(&screen),
            sender.clone(),
            Arc::clone(&alive),
        );

        let sender_task = tokio::spawn(async move { packet_sender.run().await });
        let receiver_task = tokio::spawn(async move { packet_receiver.run().await });

        Ok(Self {
            screen,
            sender,
            alive,
            phase: Mutex::new(phase),
            closed: AtomicBool::new(false),
            sender_abort: sender_task.abort_handle(),
            receiver_abort: receiver_task.abort_handle(),
            sender_task: Some(sender_task),
            receiver_task: Some(receiver_task),
        })
    }

    // ── Setup sequence ───────────────────────────────────────────

    async fn exchange_versions(
        input: &mut ReadStream,
        output: &mut WriteStream,
    ) -> Result<(), RfbError> {
        let mut line = [0u8; 12];
        input.read_bytes(&mut line).await?;
        if !line.starts_with(message::VERSION_PREFIX) {
            return Err(RfbError::BadVersion(
                String::from_utf8_lossy(&line).into_owned(),
            ));
        }
        debug!(server = %String::from_utf8_lossy(&line).trim_end(), "protocol version");
        output.write_bytes(message::VERSION_LINE).await?;
        output.flush().await
    }

    async fn authenticate(
        input: &mut ReadStream,
        output: &mut WriteStream,
        password: Option<&str>,
    ) -> Result<(), RfbError> {
        let scheme = input.read_u32().await?;
        match scheme {
            security::CONNECTION_FAILED => {
                let reason = Self::read_server_string(input).await?;
                Err(RfbError::ServerRefused(reason))
            }
            security::NONE => {
                debug!("no authentication required");
                Ok(())
            }
            security::VNC_AUTH => {
                let password = password.ok_or(RfbError::PasswordRequired)?;
                let mut challenge = [0u8; auth::CHALLENGE_LEN];
                input.read_bytes(&mut challenge).await?;
                output
                    .write_bytes(&auth::encrypt_challenge(&challenge, password))
                    .await?;
                output.flush().await?;

                match input.read_u32().await? {
                    auth_result::OK => {
                        debug!("vnc authentication accepted");
                        Ok(())
                    }
                    auth_result::FAILED => Err(RfbError::AuthFailed),
                    auth_result::TOO_MANY_ATTEMPTS => Err(RfbError::AuthTooManyAttempts),
                    other => Err(RfbError::UnknownAuthResult(other)),
                }
            }
            other => Err(RfbError::UnsupportedSecurity(other)),
        }
    }

    async fn initialize(
        input: &mut ReadStream,
        output: &mut WriteStream,
        screen: &ScreenDescription,
    ) -> Result<(), RfbError> {
        output.write_u8(CLIENT_INIT_EXCLUSIVE).await?;
        output.flush().await?;

        let width = input.read_u16().await?;
        let height = input.read_u16().await?;
        let mut raw = [0u8; PIXEL_FORMAT_LEN];
        input.read_bytes(&mut raw).await?;
        let format = PixelFormat::decode(&raw);
        let name = Self::read_server_string(input).await?;

        screen.populate(width, height, format, name);
        Ok(())
    }

    /// A u32 length-prefixed UTF-8 string, with a sanity cap.
    async fn read_server_string(input: &mut ReadStream) -> Result<String, RfbError> {
        let len = input.read_u32().await? as usize;
        if len > MAX_SERVER_STRING {
            return Err(RfbError::ProtocolViolation("server string impossibly long"));
        }
        Ok(String::from_utf8(input.read_exact_vec(len).await?)?)
    }

    // ── Steady state ─────────────────────────────────────────────

    /// Negotiated screen record.
    pub fn screen(&self) -> &Arc<ScreenDescription> {
        &self.screen
    }

    /// Handle for enqueuing input events and update requests.
    pub fn sender(&self) -> &SenderHandle {
        &self.sender
    }

    /// Whether both protocol loops are still meant to be running.
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> SessionPhase {
        self.lock_phase().clone()
    }

    fn lock_phase(&self) -> std::sync::MutexGuard<'_, SessionPhase> {
        self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait for the protocol loops to finish, tearing the peer loop
    /// down as soon as the first one dies. The first fatal error wins.
    pub async fn wait(&mut self) -> Result<(), RfbError> {
        let (Some(mut sender_task), Some(mut receiver_task)) =
            (self.sender_task.take(), self.receiver_task.take())
        else {
            return Ok(());
        };

        let mut sender_finished_first = false;
        let first = tokio::select! {
            result = &mut sender_task => {
                sender_finished_first = true;
                Self::flatten(result)
            }
            result = &mut receiver_task => Self::flatten(result),
        };

        // Whichever loop finished, the session is over: force the other
        // loop off its socket and collect it.
        self.shutdown();
        let second = if sender_finished_first {
            Self::flatten(receiver_task.await)
        } else {
            Self::flatten(sender_task.await)
        };

        if first.is_err() { first } else { second }
    }

    /// Tear the session down. Idempotent: the first call releases the
    /// tasks (and with them the socket halves), later calls are no-ops.
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("session shutdown");
        {
            let mut phase = self.lock_phase();
            if phase.begin_close().is_err() {
                warn!(phase = %*phase, "shutdown from unexpected phase");
            }
        }
        self.alive.store(false, Ordering::Release);
        // A loop blocked in a socket read only unblocks when its half
        // is dropped; aborting the tasks guarantees that.
        self.sender_abort.abort();
        self.receiver_abort.abort();
        self.lock_phase().force_close();
    }

    fn flatten(result: Result<Result<(), RfbError>, JoinError>) -> Result<(), RfbError> {
        match result {
            Ok(loop_result) => loop_result,
            Err(e) if e.is_cancelled() => Ok(()),
            Err(e) => Err(RfbError::Task(e.to_string())),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown();
    }
}
