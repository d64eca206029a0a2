//! Per-session driver: one cooperatively scheduled task group per remote
//! connection.
//!
//! Suspension points, all cancellable with the session: the server-byte
//! coalescing timer, the outbound pacing queue, and any running macro's wait
//! for the screen-settled signal. A batch of client bytes is fully processed
//! before buffered server bytes flush, and vice versa, so cursor-dependent
//! logic never sees a half-applied screen.

pub mod pacing;

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use regex::Regex;
use tokio::sync::{broadcast, mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::archive::ArchiveClient;
use crate::automaton::SessionAutomaton;
use crate::input::{ClientEvent, InputDecoder, InputToken};
use crate::macros::{self, run_script, MacroContext, MacroError, MacroTerminal};
use crate::proto::{
    AnsiColor, ChunkAction, ClientContext, Effects, MenuKind, ProxyEvent, TermQuery, TermReply,
    TermRequest,
};
use crate::term::{ansi, Emulator};
use crate::transport::{FlowEvent, ProxyFlow};

use pacing::PacingQueue;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub columns: u16,
    pub rows: u16,
    /// Quiescence window before buffered server bytes count as one settled
    /// repaint. The primary settle mechanism.
    pub coalesce_poll: Duration,
    /// Segments below this size usually close a repaint; used only to flush
    /// early, never to delay.
    pub small_segment: usize,
    pub pacing_interval: Duration,
    pub ack_timeout: Duration,
    pub macro_wait: Duration,
    /// Carry escape/Telnet sequences split across client chunks.
    pub carry_partial: bool,
    pub archive_sock: PathBuf,
    /// Run the reader-setup macro once the top panel is first recognized.
    pub run_bootstrap: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            columns: 128,
            rows: 32,
            coalesce_poll: Duration::from_millis(100),
            small_segment: 1021,
            pacing_interval: Duration::from_millis(250),
            ack_timeout: Duration::from_secs(1),
            macro_wait: Duration::from_secs(1),
            carry_partial: false,
            archive_sock: PathBuf::from("/tmp/.breakwater_archivist"),
            run_bootstrap: true,
        }
    }
}

/// The mutable heart of a session: the virtual terminal and the menu tree.
/// Shared with a running macro through [`CoreView`].
pub struct SessionCore {
    pub emulator: Box<dyn Emulator>,
    pub automaton: SessionAutomaton,
}

struct EmulatorQuery<'a> {
    emulator: &'a dyn Emulator,
}

impl TermQuery for EmulatorQuery<'_> {
    fn query(&mut self, request: TermRequest) -> TermReply {
        match request {
            TermRequest::ScreenColumns => TermReply::Columns(self.emulator.snapshot().columns),
            TermRequest::CursorBackground => {
                TermReply::Background(self.emulator.cursor_background())
            }
            TermRequest::ScreenData(region) => {
                TermReply::ScreenData(self.emulator.screen_data(&region))
            }
            // top of the chain: nothing above the session caches submenus
            TermRequest::SubmenuCached(_) => TermReply::Cached(false),
        }
    }
}

impl SessionCore {
    pub fn new(emulator: Box<dyn Emulator>) -> Self {
        Self {
            emulator,
            automaton: SessionAutomaton::new(),
        }
    }

    fn client_event(&mut self, event: ClientEvent) -> Effects {
        let mut q = EmulatorQuery {
            emulator: self.emulator.as_ref(),
        };
        self.automaton.client_event(event, &mut q)
    }

    fn pre_update(&mut self) -> Effects {
        let snapshot = self.emulator.snapshot();
        let mut q = EmulatorQuery {
            emulator: self.emulator.as_ref(),
        };
        self.automaton.pre_update(&snapshot, &mut q)
    }

    fn post_update(&mut self) -> Effects {
        let snapshot = self.emulator.snapshot();
        let mut q = EmulatorQuery {
            emulator: self.emulator.as_ref(),
        };
        self.automaton.post_update(&snapshot, &mut q)
    }
}

/// Read-only view of the session a macro runs against.
#[derive(Clone)]
pub struct CoreView(pub Arc<Mutex<SessionCore>>);

impl MacroTerminal for CoreView {
    fn current_state(&self) -> MenuKind {
        self.0.lock().unwrap().automaton.current_kind()
    }

    fn row_matches(&self, row: i32, pattern: &str) -> bool {
        let snapshot = self.0.lock().unwrap().emulator.snapshot();
        match Regex::new(pattern) {
            Ok(re) => re.is_match(snapshot.line(row)),
            Err(_) => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Before new server bytes apply; inserts stage ahead of the repaint.
    Pre,
    Client,
    Post,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cut {
    Open,
    Indefinite,
    Until(Instant),
}

/// Drives one intercepted session from connect to teardown.
pub struct SessionDriver {
    core: Arc<Mutex<SessionCore>>,
    flow: Arc<dyn ProxyFlow>,
    config: SessionConfig,
    decoder: InputDecoder,
    archive: ArchiveClient,

    server_buf: Vec<u8>,
    insert_client: Vec<u8>,
    cut: Cut,
    settle_deadline: Option<Instant>,
    settle_signal: Arc<Notify>,

    pacing: Option<PacingQueue>,
    pacing_tx: mpsc::Sender<Vec<u8>>,

    macro_cancel: Option<watch::Sender<bool>>,
    macro_task: Option<JoinHandle<()>>,
    macro_done_tx: mpsc::Sender<(String, Result<(), MacroError>)>,
    macro_done_rx: Option<mpsc::Receiver<(String, Result<(), MacroError>)>>,

    persist_enabled: bool,
    bootstrap_armed: bool,
    prev_kind: MenuKind,
}

impl SessionDriver {
    pub fn new(emulator: Box<dyn Emulator>, flow: Arc<dyn ProxyFlow>, config: SessionConfig) -> Self {
        let core = Arc::new(Mutex::new(SessionCore::new(emulator)));
        let pacing = PacingQueue::start(flow.clone(), config.pacing_interval, config.ack_timeout);
        let pacing_tx = pacing.sender();
        let (macro_done_tx, macro_done_rx) = mpsc::channel(4);
        let archive = ArchiveClient::new(&config.archive_sock);
        let bootstrap_armed = config.run_bootstrap;
        Self {
            core,
            flow,
            decoder: InputDecoder::new(config.carry_partial),
            archive,
            config,
            server_buf: Vec::new(),
            insert_client: Vec::new(),
            cut: Cut::Open,
            settle_deadline: None,
            settle_signal: Arc::new(Notify::new()),
            pacing: Some(pacing),
            pacing_tx,
            macro_cancel: None,
            macro_task: None,
            macro_done_tx,
            macro_done_rx: Some(macro_done_rx),
            persist_enabled: true,
            bootstrap_armed,
            prev_kind: MenuKind::Unknown,
        }
    }

    pub fn core(&self) -> Arc<Mutex<SessionCore>> {
        self.core.clone()
    }

    /// Session main loop. Returns when the host signals the end of the
    /// connection; every sub-task is torn down before returning.
    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<FlowEvent>,
        mut dump_rx: broadcast::Receiver<()>,
    ) {
        let mut macro_done_rx = self
            .macro_done_rx
            .take()
            .expect("run called once");
        let mut dump_open = true;

        loop {
            let settle_at = self.settle_deadline;
            tokio::select! {
                event = events.recv() => match event {
                    Some(FlowEvent::ClientBytes(bytes)) => self.on_client_chunk(&bytes).await,
                    Some(FlowEvent::ServerBytes(bytes)) => self.on_server_chunk(&bytes).await,
                    Some(FlowEvent::Closed) | None => break,
                },
                _ = async { tokio::time::sleep_until(settle_at.unwrap_or_else(Instant::now)).await },
                    if settle_at.is_some() =>
                {
                    self.settle().await;
                }
                done = macro_done_rx.recv() => {
                    if let Some((name, result)) = done {
                        self.on_macro_done(&name, result).await;
                    }
                }
                request = dump_rx.recv(), if dump_open => match request {
                    Ok(()) => self.dump(),
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => dump_open = false,
                },
            }
        }

        info!(target: "breakwater::session", "session ended");
        self.teardown().await;
    }

    fn cut_active(&self) -> bool {
        match self.cut {
            Cut::Open => false,
            Cut::Indefinite => true,
            Cut::Until(deadline) => Instant::now() < deadline,
        }
    }

    /// Server bytes: stage for the emulator, forward to the client unless the
    /// stream is cut, and (re)arm the quiescence timer.
    async fn on_server_chunk(&mut self, bytes: &[u8]) {
        if self.server_buf.is_empty() {
            // capture facts the repaint is about to destroy
            let effects = self.core.lock().unwrap().pre_update();
            self.apply_effects(effects, Phase::Pre).await;
        }

        self.server_buf.extend_from_slice(bytes);

        if self.cut_active() {
            debug!(target: "breakwater::session", len = bytes.len(), "stream cut; withholding");
        } else {
            let mut out = std::mem::take(&mut self.insert_client);
            out.extend_from_slice(bytes);
            if let Err(err) = self.flow.send_to_client(&out).await {
                warn!(target: "breakwater::session", %err, "client forward failed");
            }
        }

        self.settle_deadline = Some(Instant::now() + self.config.coalesce_poll);
        if bytes.len() < self.config.small_segment {
            // short segments usually close a repaint; flush early
            self.settle().await;
        }
    }

    /// The screen has settled: feed everything buffered, classify, run the
    /// per-context parsing, persist closed-out threads.
    async fn settle(&mut self) {
        self.settle_deadline = None;
        if self.server_buf.is_empty() {
            return;
        }
        let bytes = std::mem::take(&mut self.server_buf);
        let (effects, records) = {
            let mut core = self.core.lock().unwrap();
            core.emulator.feed(&bytes);
            let effects = core.post_update();
            let records = core.automaton.drain_records();
            (effects, records)
        };
        self.apply_effects(effects, Phase::Post).await;

        for record in records {
            if self.persist_enabled {
                self.archive.send_thread(record).await;
            } else {
                debug!(target: "breakwater::session", "persistence suspended; record dropped");
            }
        }

        if let Cut::Until(deadline) = self.cut {
            if Instant::now() >= deadline {
                self.cut = Cut::Open;
            }
        }

        self.settle_signal.notify_one();
        self.maybe_bootstrap().await;
    }

    /// Client bytes: drain any buffered server state first, decode, hand each
    /// key to the menu machine, then forward / replace / drop the chunk.
    async fn on_client_chunk(&mut self, bytes: &[u8]) {
        if !self.server_buf.is_empty() {
            self.settle().await;
        }

        let tokens = self.decoder.decode(bytes);
        let mut action = ChunkAction::default();
        let mut collected: Effects = Vec::new();
        {
            let mut core = self.core.lock().unwrap();
            for token in tokens {
                match token {
                    InputToken::Resize { cols, rows } => {
                        info!(target: "breakwater::session", cols, rows, "terminal resized");
                        core.emulator.resize(cols, rows);
                    }
                    InputToken::VtFunction(n) => {
                        debug!(target: "breakwater::session", number = n, "vt function key");
                    }
                    InputToken::Key(key) => {
                        if key.uncommitted {
                            // keep the local cursor honest before the remote
                            // confirms the move
                            match key.event {
                                ClientEvent::Up => core.emulator.cursor_up(),
                                ClientEvent::Down => core.emulator.cursor_down(),
                                _ => {}
                            }
                        }
                        let effects = core.client_event(key.event);
                        for event in &effects {
                            action.absorb(event);
                        }
                        collected.extend(effects);
                    }
                }
            }
        }
        self.apply_effects(collected, Phase::Client).await;

        match action {
            ChunkAction::Forward => {
                if let Err(err) = self.flow.send_to_server(bytes).await {
                    warn!(target: "breakwater::session", %err, "server forward failed");
                }
            }
            ChunkAction::Replace(replacement) => {
                debug!(target: "breakwater::session", "client chunk replaced");
                if let Err(err) = self.flow.send_to_server(&replacement).await {
                    warn!(target: "breakwater::session", %err, "server forward failed");
                }
            }
            ChunkAction::Drop => {
                debug!(target: "breakwater::session", "client chunk dropped");
                // a proxy-local overlay may be waiting to open; nothing will
                // repaint the screen on its behalf
                let effects = self.core.lock().unwrap().post_update();
                self.apply_effects(effects, Phase::Post).await;
            }
        }
    }

    async fn apply_effects(&mut self, effects: Effects, phase: Phase) {
        for event in effects {
            match event {
                ProxyEvent::SendToServer(bytes) => {
                    if self.pacing_tx.send(bytes).await.is_err() {
                        warn!(target: "breakwater::session", "pacing queue gone");
                    }
                }
                ProxyEvent::InsertToServer(bytes) => {
                    let _ = self.flow.send_to_server(&bytes).await;
                }
                ProxyEvent::SendToClient(bytes) => {
                    let _ = self.flow.send_to_client(&bytes).await;
                }
                ProxyEvent::InsertToClient(bytes) => {
                    if phase == Phase::Pre {
                        self.insert_client.extend_from_slice(&bytes);
                    } else {
                        let _ = self.flow.send_to_client(&bytes).await;
                    }
                }
                ProxyEvent::DrawClient(ctx) => {
                    let rows = self.screen_rows();
                    let _ = self.flow.send_to_client(&ansi::draw(&ctx, rows)).await;
                }
                ProxyEvent::DrawCursor => {
                    let snap = self.core.lock().unwrap().emulator.snapshot();
                    let _ = self
                        .flow
                        .send_to_client(&ansi::goto(snap.cursor_row, snap.cursor_col))
                        .await;
                }
                ProxyEvent::ResetRendition => {
                    let _ = self.flow.send_to_client(&ansi::reset()).await;
                }
                ProxyEvent::CutStream(secs) => {
                    self.cut = if secs == 0 {
                        Cut::Indefinite
                    } else {
                        Cut::Until(Instant::now() + Duration::from_secs(secs as u64))
                    };
                    debug!(target: "breakwater::session", secs, "stream cut");
                }
                ProxyEvent::ResumeStream => {
                    self.cut = Cut::Open;
                    debug!(target: "breakwater::session", "stream resumed");
                }
                ProxyEvent::RunMacro(name) => self.start_macro(&name).await,
                ProxyEvent::Warning(text) => {
                    warn!(target: "breakwater::session", %text, "warning");
                    self.banner(&text).await;
                }
                ProxyEvent::BoardName(name) => {
                    info!(target: "breakwater::session", board = %name, "board");
                }
                ProxyEvent::ThreadUrl(url) => {
                    debug!(target: "breakwater::session", %url, "thread url");
                }
                ProxyEvent::BannedLine(text) => {
                    info!(target: "breakwater::session", %text, "line banned");
                }
                // folded into the chunk action by the caller
                ProxyEvent::DropContent | ProxyEvent::ReplaceContent(_) => {}
                // consumed by their owning levels; stray ones are harmless
                ProxyEvent::Return
                | ProxyEvent::Switch(_)
                | ProxyEvent::True
                | ProxyEvent::False
                | ProxyEvent::Ok => {}
                ProxyEvent::BanFloor(_)
                | ProxyEvent::UnbanFloor(_)
                | ProxyEvent::SetGround(_)
                | ProxyEvent::GetGround => {
                    warn!(target: "breakwater::session", ?event, "annotation outside a thread");
                }
            }
        }
    }

    fn screen_rows(&self) -> u16 {
        self.core.lock().unwrap().emulator.snapshot().rows
    }

    /// Transient bottom-row notice; the next repaint overwrites it.
    async fn banner(&mut self, text: &str) {
        let ctx = ClientContext::text(-1, 1, text).styled(AnsiColor::White, AnsiColor::Red, true);
        let rows = self.screen_rows();
        let mut bytes = ansi::draw(&ctx, rows);
        bytes.extend_from_slice(&ansi::reset());
        let snap = self.core.lock().unwrap().emulator.snapshot();
        bytes.extend_from_slice(&ansi::goto(snap.cursor_row, snap.cursor_col));
        let _ = self.flow.send_to_client(&bytes).await;
    }

    /// First sight of the top panel on a fresh session kicks off the reader
    /// configuration macro.
    async fn maybe_bootstrap(&mut self) {
        let current = self.core.lock().unwrap().automaton.current_kind();
        if self.bootstrap_armed
            && self.prev_kind == MenuKind::Unknown
            && current == MenuKind::BoardList
        {
            self.bootstrap_armed = false;
            info!(target: "breakwater::session", "running reader-setup bootstrap");
            self.start_macro("reader-setup").await;
        }
        self.prev_kind = current;
    }

    async fn start_macro(&mut self, name: &str) {
        let Some(script) = macros::by_name(name) else {
            warn!(target: "breakwater::session", name, "unknown macro");
            self.banner(&format!("unknown macro: {name}")).await;
            return;
        };
        self.cancel_macro().await;

        // archival is suspended while the macro walks through threads it has
        // no interest in keeping
        self.persist_enabled = false;

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let mut ctx = MacroContext::new(
            self.settle_signal.clone(),
            self.config.macro_wait,
            cancel_rx,
        );
        let view = CoreView(self.core.clone());
        let sender = self.pacing_tx.clone();
        let done = self.macro_done_tx.clone();
        let name = name.to_string();
        let task = tokio::spawn(async move {
            let result = run_script(&script, &view, &sender, &mut ctx).await;
            let _ = done.send((name, result)).await;
        });
        self.macro_cancel = Some(cancel_tx);
        self.macro_task = Some(task);
    }

    async fn on_macro_done(&mut self, name: &str, result: Result<(), MacroError>) {
        // whatever happened, behavior gated on the macro comes back
        self.persist_enabled = true;
        self.macro_cancel = None;
        self.macro_task = None;
        match result {
            Ok(()) => {
                info!(target: "breakwater::session", name, "macro finished");
                self.banner(&format!("macro {name} finished")).await;
            }
            Err(err) => {
                warn!(target: "breakwater::session", name, %err, "macro failed");
                self.banner(&format!("macro {name} failed: {err}")).await;
            }
        }
    }

    async fn cancel_macro(&mut self) {
        if let Some(cancel) = self.macro_cancel.take() {
            let _ = cancel.send(true);
        }
        if let Some(task) = self.macro_task.take() {
            let _ = task.await;
        }
        self.persist_enabled = true;
    }

    /// Operator dump: active menu path, macro status, archive health.
    fn dump(&self) {
        let core = self.core.lock().unwrap();
        let state = core.automaton.describe();
        info!(
            target: "breakwater::session",
            macro_running = self.macro_task.is_some(),
            archive_connected = self.archive.is_connected(),
            archive_pending = self.archive.pending_count(),
            current = core.automaton.current_kind().name(),
            "state dump\n{state}"
        );
    }

    async fn teardown(mut self) {
        self.cancel_macro().await;
        if let Some(pacing) = self.pacing.take() {
            pacing.shutdown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::term::{MockEmulator, SharedMockEmulator};
    use crate::transport::mock::MockFlow;

    fn test_config() -> SessionConfig {
        SessionConfig {
            // keep the size heuristic out of unit tests; settle explicitly
            small_segment: 0,
            run_bootstrap: false,
            ..SessionConfig::default()
        }
    }

    fn driver_with_screen(
        setup: impl FnOnce(&mut MockEmulator),
    ) -> (SessionDriver, SharedMockEmulator, Arc<MockFlow>) {
        let shared = SharedMockEmulator::new(120, 24);
        setup(&mut shared.0.lock().unwrap());
        let flow = Arc::new(MockFlow::new());
        let driver = SessionDriver::new(Box::new(shared.clone()), flow.clone(), test_config());
        (driver, shared, flow)
    }

    fn board_screen(emu: &mut MockEmulator) {
        emu.set_screen(&[
            "  【板主:somebody】       看板《Test》",
            ">  123 + 5/01 author      □ [問題] first thread",
        ]);
        emu.set_last_line("  文章選讀  (y)回應(X)推文");
        emu.set_cursor(2, 1);
    }

    fn reader_screen(emu: &mut MockEmulator) {
        emu.set_screen(&[
            "   作者  author ()                                  看板  Test",
            "   標題  [問題] first thread",
            "body",
            "--",
            "※ 發信站: 批踢踢實業坊(ptt.cc), 來自: 1.2.3.4",
            "※ 文章網址: https://www.ptt.cc/bbs/Test/G.1.A.001.html",
            "推 alice: first",
        ]);
        emu.set_last_line("  瀏覽 第 1/1 頁 (100%)  目前顯示: 第 1~7 行");
        emu.set_cursor(1, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn server_chunks_coalesce_into_one_settle() {
        let (mut driver, shared, flow) = driver_with_screen(board_screen);

        driver.on_server_chunk(b"frag-one").await;
        driver.on_server_chunk(b"frag-two").await;
        // both fragments reached the client immediately
        assert_eq!(flow.client_bytes(), b"frag-onefrag-two");
        // but the emulator sees nothing until the settle
        assert!(shared.0.lock().unwrap().fed.is_empty());

        driver.settle().await;
        let fed = shared.0.lock().unwrap().fed.clone();
        assert_eq!(fed, vec![b"frag-onefrag-two".to_vec()]);

        // a second settle without new bytes is a no-op
        driver.settle().await;
        assert_eq!(shared.0.lock().unwrap().fed.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn client_chunk_flushes_buffered_server_bytes_first() {
        let (mut driver, shared, flow) = driver_with_screen(board_screen);

        driver.on_server_chunk(b"pending").await;
        driver.on_client_chunk(b"x").await;

        // the settle ran before the client key was interpreted
        assert_eq!(shared.0.lock().unwrap().fed.len(), 1);
        assert_eq!(flow.server_bytes(), b"x");
    }

    #[tokio::test(start_paused = true)]
    async fn resize_negotiation_is_applied_and_forwarded() {
        let (mut driver, shared, flow) = driver_with_screen(board_screen);

        let naws = [0xff, 0xfa, 0x1f, 0x00, 0x50, 0x00, 0x20, 0xff, 0xf0];
        driver.on_client_chunk(&naws).await;

        let emu = shared.0.lock().unwrap();
        assert_eq!((emu.columns, emu.rows), (80, 32));
        drop(emu);
        // the negotiation still reaches the real server
        assert_eq!(flow.server_bytes(), naws);
    }

    #[tokio::test(start_paused = true)]
    async fn entering_a_thread_replaces_the_keystroke_with_a_probe() {
        let (mut driver, _shared, flow) = driver_with_screen(board_screen);

        driver.on_server_chunk(b"paint").await;
        driver.settle().await;
        flow.clear();

        driver.on_client_chunk(b"\r").await;
        assert_eq!(flow.server_bytes(), b"Q");
    }

    #[tokio::test(start_paused = true)]
    async fn prohibited_navigation_is_dropped() {
        let (mut driver, _shared, flow) = driver_with_screen(reader_screen);

        driver.on_server_chunk(b"paint").await;
        driver.settle().await;
        flow.clear();

        // at 100% the thread is at its end; Down must not cross over
        driver.on_client_chunk(b"\x1b[B").await;
        assert!(flow.server_bytes().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn command_box_cuts_the_stream() {
        let (mut driver, _shared, flow) = driver_with_screen(reader_screen);

        driver.on_server_chunk(b"paint").await;
        driver.settle().await;
        flow.clear();

        driver.on_client_chunk(b";").await;
        // the keystroke never reaches the server
        assert!(flow.server_bytes().is_empty());
        // the prompt was drawn on the client
        let drawn = String::from_utf8_lossy(&flow.client_bytes()).to_string();
        assert!(drawn.contains("Command:"));
        flow.clear();

        // server repaints are withheld while the box is open
        driver.on_server_chunk(b"repaint").await;
        assert!(flow.client_bytes().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn uncommitted_arrow_moves_the_local_cursor() {
        let (mut driver, shared, _flow) = driver_with_screen(board_screen);
        shared.0.lock().unwrap().set_cursor(5, 1);

        driver.on_client_chunk(b"\x1b[A\r").await;
        assert_eq!(shared.0.lock().unwrap().cursor_row, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn macro_completion_restores_persistence() {
        let (mut driver, _shared, _flow) = driver_with_screen(board_screen);

        driver.persist_enabled = false;
        driver.on_macro_done("reader-setup", Ok(())).await;
        assert!(driver.persist_enabled);

        driver.persist_enabled = false;
        driver
            .on_macro_done("reader-setup", Err(MacroError::Timeout))
            .await;
        assert!(driver.persist_enabled);
    }

    #[tokio::test(start_paused = true)]
    async fn bootstrap_fires_once_on_first_panel() {
        let shared = SharedMockEmulator::new(120, 24);
        let flow = Arc::new(MockFlow::new());
        let config = SessionConfig {
            small_segment: 0,
            run_bootstrap: true,
            ..SessionConfig::default()
        };
        let mut driver = SessionDriver::new(Box::new(shared.clone()), flow.clone(), config);

        {
            let mut emu = shared.0.lock().unwrap();
            emu.set_screen(&["【看板列表】", "> 1 Test"]);
            emu.set_last_line("選擇看板 (進入看板)");
        }
        driver.on_server_chunk(b"paint").await;
        driver.settle().await;
        assert!(driver.macro_task.is_some());
        assert!(!driver.persist_enabled);

        driver.teardown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn teardown_cancels_running_macro() {
        let (mut driver, _shared, _flow) = driver_with_screen(board_screen);
        driver.start_macro("reader-setup").await;
        assert!(driver.macro_task.is_some());
        driver.teardown().await;
    }
}
