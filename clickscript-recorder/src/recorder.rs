use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_stream::Stream;
use tracing::{debug, error, info, warn};

use clickscript::platforms::XcapScreen;
use clickscript::{
    save_script, Action, ChordAction, ChordDefinition, ChordRecognizer, ChordTable, ClickButton,
    Command, Configuration, Mode, ModeGuard, Program, RawEvent, Recognition, Session,
};

use crate::capture::TemplateCapture;
use crate::click::ClickTracker;
use crate::events::{EventTranslator, InputEvent};
use crate::{RecorderError, Result};

/// A command written into the program, with its position.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCommand {
    pub index: usize,
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineFlow {
    Continue,
    Stop,
}

/// Turns input events into program commands.
///
/// Left clicks get a template attached when capture is enabled, a second left
/// click inside the double-click window turns the previous click into a double
/// click, and everything else goes through the chord recognizer.
pub struct RecordingPipeline {
    program: Arc<Mutex<Program>>,
    recognizer: ChordRecognizer,
    clicks: ClickTracker,
    capture: Option<TemplateCapture>,
    events: broadcast::Sender<RecordedCommand>,
}

impl RecordingPipeline {
    pub fn new(
        program: Arc<Mutex<Program>>,
        chords: ChordTable,
        double_click: Duration,
        capture: Option<TemplateCapture>,
        events: broadcast::Sender<RecordedCommand>,
    ) -> Self {
        Self {
            program,
            recognizer: ChordRecognizer::new(chords),
            clicks: ClickTracker::new(double_click),
            capture,
            events,
        }
    }

    pub fn handle(&mut self, event: InputEvent) -> Result<PipelineFlow> {
        match &event.raw {
            RawEvent::Click(ClickButton::Left, _) => {
                if self.clicks.left_click(event.time) && self.promote_to_double()? {
                    return Ok(PipelineFlow::Continue);
                }
            }
            _ => self.clicks.interrupt(),
        }

        let raw = self.attach_template(event.raw);
        match self.recognizer.feed(raw) {
            Recognition::Pending => Ok(PipelineFlow::Continue),
            Recognition::Flush(raws) => {
                for raw in raws {
                    self.record(raw.into_command())?;
                }
                Ok(PipelineFlow::Continue)
            }
            Recognition::Matched(chord) => self.apply(chord, event.position),
        }
    }

    /// Records whatever the recognizer is still holding.
    pub fn finish(&mut self) -> Result<()> {
        for raw in self.recognizer.flush() {
            self.record(raw.into_command())?;
        }
        Ok(())
    }

    fn apply(&mut self, chord: ChordDefinition, position: (i32, i32)) -> Result<PipelineFlow> {
        info!("Chord '{}' recognized", chord.name);
        match chord.action {
            ChordAction::StopRecording => return Ok(PipelineFlow::Stop),
            ChordAction::CaptureTemplate => match &self.capture {
                Some(capture) => match capture.capture_new(position) {
                    Ok(name) => info!("Captured template {} at ({}, {})", name, position.0, position.1),
                    Err(e) => warn!("Template capture failed: {}", e),
                },
                None => warn!("Template capture is disabled"),
            },
            ChordAction::Shortcut(_) => {}
        }
        if let Some(command) = chord.action.command() {
            self.record(command)?;
        }
        Ok(PipelineFlow::Continue)
    }

    fn attach_template(&self, raw: RawEvent) -> RawEvent {
        match (raw, &self.capture) {
            (RawEvent::Click(button @ (ClickButton::Left | ClickButton::Double), target), Some(capture)) => {
                match capture.template_for((target.x, target.y)) {
                    Ok(name) => RawEvent::Click(button, target.with_template(name)),
                    Err(e) => {
                        warn!("Recording click at ({}, {}) without a template: {}", target.x, target.y, e);
                        RawEvent::Click(button, target)
                    }
                }
            }
            (raw, _) => raw,
        }
    }

    /// Turns the left click under the cursor into a double click.
    fn promote_to_double(&mut self) -> Result<bool> {
        let mut program = self.program.lock().map_err(|_| RecorderError::Poisoned)?;
        let Some(index) = program.cursor() else {
            return Ok(false);
        };
        let Some(Action::Click(ClickButton::Left, target)) = program.get_at(index).map(|c| &c.action) else {
            return Ok(false);
        };
        let command = Command::new(Action::Click(ClickButton::Double, target.clone()));
        program.replace(command.clone())?;
        debug!("Click {} promoted to a double click", index);
        let _ = self.events.send(RecordedCommand { index, command });
        Ok(true)
    }

    fn record(&mut self, command: Command) -> Result<()> {
        let index = {
            let mut program = self.program.lock().map_err(|_| RecorderError::Poisoned)?;
            program.insert(command.clone())?;
            program.cursor().unwrap_or_default()
        };
        debug!("Recorded {} at {}", command, index);
        // No subscribers is fine.
        let _ = self.events.send(RecordedCommand { index, command });
        Ok(())
    }
}

enum Message {
    Input(InputEvent),
    ListenerFailed(String),
    Stop,
}

/// Feeds input into a recording started with [`ScriptRecorder::start_with_feed`].
#[derive(Clone)]
pub struct InputFeed {
    tx: mpsc::UnboundedSender<Message>,
}

impl InputFeed {
    /// False once the recording has ended.
    pub fn send(&self, event: InputEvent) -> bool {
        self.tx.send(Message::Input(event)).is_ok()
    }
}

struct Running {
    stop_indicator: Arc<AtomicBool>,
    input_tx: mpsc::UnboundedSender<Message>,
    task: JoinHandle<Result<()>>,
    _guard: ModeGuard,
}

/// Records live mouse and keyboard input into a program.
pub struct ScriptRecorder {
    config: Configuration,
    chords: ChordTable,
    session: Session,
    program: Arc<Mutex<Program>>,
    event_tx: broadcast::Sender<RecordedCommand>,
    capture_templates: bool,
    done: watch::Receiver<bool>,
    running: Option<Running>,
}

impl ScriptRecorder {
    pub fn new(config: Configuration, session: Session) -> Self {
        let (event_tx, _) = broadcast::channel(100);
        let (_, done) = watch::channel(false);
        Self {
            config,
            chords: ChordTable::builtin(),
            session,
            program: Arc::new(Mutex::new(Program::new())),
            event_tx,
            capture_templates: true,
            done,
            running: None,
        }
    }

    pub fn with_chords(mut self, chords: ChordTable) -> Self {
        self.chords = chords;
        self
    }

    /// Continues an existing program; new commands go after its cursor.
    pub fn with_program(mut self, program: Program) -> Self {
        self.program = Arc::new(Mutex::new(program));
        self
    }

    /// Records clicks without saving element templates.
    pub fn without_templates(mut self) -> Self {
        self.capture_templates = false;
        self
    }

    pub fn is_recording(&self) -> bool {
        self.running.is_some()
    }

    pub fn program(&self) -> Result<Program> {
        self.program
            .lock()
            .map(|program| program.clone())
            .map_err(|_| RecorderError::Poisoned)
    }

    /// Applies a manual edit to the program. Refused while this recorder or
    /// a playback on the same session is running.
    pub fn edit<R>(&self, f: impl FnOnce(&mut Program) -> R) -> Result<R> {
        let mut program = self.program.lock().map_err(|_| RecorderError::Poisoned)?;
        Ok(f(program.edit(&self.session)?))
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let program = self.program()?;
        save_script(path, &program)?;
        Ok(())
    }

    /// Commands as they are recorded.
    pub fn event_stream(&self) -> impl Stream<Item = RecordedCommand> {
        let mut rx = self.event_tx.subscribe();
        Box::pin(async_stream::stream! {
            loop {
                match rx.recv().await {
                    Ok(event) => yield event,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Event stream lagged, skipped {} commands", skipped);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Becomes true when recording ends, through the stop chord or [`stop`](Self::stop).
    pub fn finished(&self) -> watch::Receiver<bool> {
        self.done.clone()
    }

    /// Starts listening to the real mouse and keyboard.
    pub async fn start(&mut self) -> Result<()> {
        info!("Starting recording");
        let capture = self
            .capture_templates
            .then(|| TemplateCapture::from_configuration(XcapScreen::new(), &self.config));
        let (input_tx, stop_indicator) = self.launch(capture)?;

        let fail_tx = input_tx.clone();
        let spawned = thread::Builder::new()
            .name("clickscript-listener".to_string())
            .spawn(move || {
                let mut translator = EventTranslator::new();
                if let Err(error) = rdev::listen(move |event: rdev::Event| {
                    if stop_indicator.load(Ordering::SeqCst) {
                        return;
                    }
                    if let Some(input) = translator.translate(&event.event_type, Instant::now()) {
                        let _ = input_tx.send(Message::Input(input));
                    }
                }) {
                    error!("Error listening to input: {:?}", error);
                    let _ = fail_tx.send(Message::ListenerFailed(format!("{error:?}")));
                }
            });
        if let Err(e) = spawned {
            self.stop().await?;
            return Err(RecorderError::Listener(format!("failed to spawn listener: {e}")));
        }
        Ok(())
    }

    /// Starts recording from events supplied by the caller instead of the
    /// OS listener. Must be called inside a tokio runtime.
    pub fn start_with_feed(&mut self, capture: Option<TemplateCapture>) -> Result<InputFeed> {
        let (tx, _) = self.launch(capture)?;
        Ok(InputFeed { tx })
    }

    fn launch(
        &mut self,
        capture: Option<TemplateCapture>,
    ) -> Result<(mpsc::UnboundedSender<Message>, Arc<AtomicBool>)> {
        if self.running.is_some() {
            return Err(RecorderError::AlreadyRecording);
        }
        let guard = self.session.begin(Mode::Recording)?;

        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = watch::channel(false);
        let stop_indicator = Arc::new(AtomicBool::new(false));
        let pipeline = RecordingPipeline::new(
            Arc::clone(&self.program),
            self.chords.clone(),
            Duration::from_millis(self.config.double_click_ms),
            capture,
            self.event_tx.clone(),
        );
        let indicator = Arc::clone(&stop_indicator);
        let task = tokio::task::spawn_blocking(move || {
            Self::process_events(pipeline, input_rx, indicator, done_tx)
        });

        self.done = done_rx;
        self.running = Some(Running {
            stop_indicator: Arc::clone(&stop_indicator),
            input_tx: input_tx.clone(),
            task,
            _guard: guard,
        });
        Ok((input_tx, stop_indicator))
    }

    /// Stops recording and waits for pending input to be written.
    pub async fn stop(&mut self) -> Result<()> {
        let running = self.running.take().ok_or(RecorderError::NotRecording)?;
        info!("Stopping recording");
        running.stop_indicator.store(true, Ordering::SeqCst);
        // Already gone when the stop chord ended the recording.
        let _ = running.input_tx.send(Message::Stop);
        let result = running
            .task
            .await
            .map_err(|e| RecorderError::Listener(format!("recording task failed: {e}")))?;
        let count = self.program()?.len();
        info!("Recording stopped with {} command(s)", count);
        result
    }

    fn process_events(
        mut pipeline: RecordingPipeline,
        mut input_rx: mpsc::UnboundedReceiver<Message>,
        stop_indicator: Arc<AtomicBool>,
        done_tx: watch::Sender<bool>,
    ) -> Result<()> {
        let result = loop {
            let Some(message) = input_rx.blocking_recv() else {
                break Ok(());
            };
            match message {
                Message::Input(event) => match pipeline.handle(event) {
                    Ok(PipelineFlow::Continue) => {}
                    Ok(PipelineFlow::Stop) => break Ok(()),
                    Err(e) => break Err(e),
                },
                Message::ListenerFailed(reason) => break Err(RecorderError::Listener(reason)),
                Message::Stop => break Ok(()),
            }
        };
        stop_indicator.store(true, Ordering::SeqCst);
        let flushed = pipeline.finish();
        done_tx.send_replace(true);
        result.and(flushed)
    }
}

impl Drop for ScriptRecorder {
    fn drop(&mut self) {
        if let Some(running) = &self.running {
            running.stop_indicator.store(true, Ordering::SeqCst);
            let _ = running.input_tx.send(Message::Stop);
        }
    }
}
