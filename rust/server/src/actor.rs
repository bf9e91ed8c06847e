//! One tokio task per match: serializes commands, runs the roll and AI timers,
//! and broadcasts every committed view.

use ai::{AiError, MoveChooser};
use engine::{roll_die, Dice, PlayerId, TokenId};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use crate::config::{MatchSettings, Timing};
use crate::session::{MatchSession, MatchView, PlayOutcome, SessionError};
use crate::store::Stores;

const COMMAND_BUFFER: usize = 32;
const EVENT_BUFFER: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Roll,
    Move(TokenId),
    Skip,
    Undo,
    Pause,
    Resume,
    Restart(Option<MatchSettings>),
    UpdatePlayer {
        player_id: PlayerId,
        name: Option<String>,
        avatar: Option<String>,
    },
    View,
    /// Stop the actor; the reply carries the final view.
    Close,
}

struct Envelope {
    command: Command,
    reply: oneshot::Sender<Result<MatchView, SessionError>>,
}

#[derive(Clone)]
pub struct MatchHandle {
    id: String,
    tx: mpsc::Sender<Envelope>,
    events: broadcast::Sender<MatchView>,
}

impl MatchHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn send(&self, command: Command) -> Result<MatchView, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Envelope { command, reply })
            .await
            .map_err(|_| SessionError::Closed)?;
        rx.await.map_err(|_| SessionError::Closed)?
    }

    pub async fn view(&self) -> Result<MatchView, SessionError> {
        self.send(Command::View).await
    }

    pub async fn close(&self) -> Result<MatchView, SessionError> {
        self.send(Command::Close).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MatchView> {
        self.events.subscribe()
    }
}

/// Shared collaborators every match actor needs.
#[derive(Clone)]
pub struct MatchServices {
    pub chooser: Arc<dyn MoveChooser>,
    pub stores: Stores,
    pub timing: Timing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pending {
    ResolveRoll,
    AiRoll,
    AiMove(TokenId),
    AutoSkip,
}

impl Pending {
    fn label(self) -> &'static str {
        match self {
            Pending::ResolveRoll => "roll",
            Pending::AiRoll => "ai_think",
            Pending::AiMove(_) => "ai_move",
            Pending::AutoSkip => "auto_skip",
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Timer {
    due: Instant,
    pending: Pending,
}

struct Decision {
    epoch: u64,
    choice: Result<Option<TokenId>, AiError>,
}

struct MatchActor {
    session: MatchSession,
    services: MatchServices,
    events: broadcast::Sender<MatchView>,
    decisions: mpsc::UnboundedSender<Decision>,
    rng: StdRng,
    timer: Option<Timer>,
    /// Remaining delay of a timer frozen by pause.
    suspended: Option<(Duration, Pending)>,
    deciding: bool,
    epoch: u64,
}

/// Start the actor for `session`. `seed` makes dice and think delays reproducible.
pub fn spawn_match(session: MatchSession, services: MatchServices, seed: Option<u64>) -> MatchHandle {
    let (tx, commands) = mpsc::channel(COMMAND_BUFFER);
    let (decisions, decision_rx) = mpsc::unbounded_channel();
    let (events, _) = broadcast::channel(EVENT_BUFFER);
    let handle = MatchHandle {
        id: session.id().to_string(),
        tx,
        events: events.clone(),
    };
    let rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let actor = MatchActor {
        session,
        services,
        events,
        decisions,
        rng,
        timer: None,
        suspended: None,
        deciding: false,
        epoch: 0,
    };
    tokio::spawn(actor.run(commands, decision_rx));
    handle
}

impl MatchActor {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Envelope>,
        mut decisions: mpsc::UnboundedReceiver<Decision>,
    ) {
        info!(match_id = %self.session.id(), "match started");
        self.schedule();
        loop {
            let due = self.timer.map(|t| t.due);
            tokio::select! {
                envelope = commands.recv() => {
                    let Some(Envelope { command, reply }) = envelope else {
                        break;
                    };
                    let closing = command == Command::Close;
                    let _ = reply.send(self.handle(command));
                    if closing {
                        break;
                    }
                }
                Some(decision) = decisions.recv() => self.on_decision(decision),
                _ = sleep_until(due.unwrap_or_else(Instant::now)), if due.is_some() => self.fire(),
            }
        }
        info!(match_id = %self.session.id(), "match closed");
    }

    fn view(&self) -> MatchView {
        let mut view = self.session.view();
        view.pending = self
            .timer
            .map(|t| t.pending)
            .or(self.suspended.map(|(_, pending)| pending))
            .map(|p| p.label().to_string())
            .or_else(|| self.deciding.then(|| "ai_decide".to_string()));
        view
    }

    fn publish(&self) {
        let _ = self.events.send(self.view());
    }

    fn handle(&mut self, command: Command) -> Result<MatchView, SessionError> {
        match command {
            Command::Roll => {
                self.session.require_human()?;
                self.session.begin_roll()?;
            }
            Command::Move(token) => {
                self.session.require_human()?;
                let outcome = self.session.play(token)?;
                self.record(outcome);
                self.reset_pending();
            }
            Command::Skip => {
                self.session.require_human()?;
                self.session.skip()?;
                self.reset_pending();
            }
            Command::Undo => {
                self.session.undo()?;
                self.reset_pending();
            }
            Command::Pause => {
                self.session.pause()?;
                self.suspend();
            }
            Command::Resume => {
                self.session.resume()?;
                self.unsuspend();
            }
            Command::Restart(settings) => {
                self.session.restart(settings)?;
                self.reset_pending();
            }
            Command::UpdatePlayer {
                player_id,
                name,
                avatar,
            } => {
                self.session
                    .update_player(player_id, name.as_deref(), avatar.as_deref())?;
            }
            Command::View | Command::Close => return Ok(self.view()),
        }
        self.schedule();
        self.publish();
        Ok(self.view())
    }

    /// Arm whatever the current state waits on, unless something is already pending.
    fn schedule(&mut self) {
        if self.timer.is_some() || self.suspended.is_some() || self.deciding {
            return;
        }
        let state = self.session.state();
        if !state.active() {
            return;
        }
        let ai_turn = state.current().is_ai;
        let timing = self.services.timing;
        match state.dice {
            Dice::Rolling => self.arm(timing.roll_delay, Pending::ResolveRoll),
            Dice::Idle if ai_turn => {
                let delay = self.think_delay();
                self.arm(delay, Pending::AiRoll);
            }
            Dice::Idle => {}
            Dice::Resolved(_) => {
                if state.legal_moves_now().is_empty() {
                    let delay = if ai_turn {
                        timing.ai_skip_delay
                    } else {
                        timing.human_skip_delay
                    };
                    self.arm(delay, Pending::AutoSkip);
                } else if ai_turn {
                    self.start_decision();
                }
            }
        }
    }

    fn arm(&mut self, delay: Duration, pending: Pending) {
        if self.session.state().active() {
            self.timer = Some(Timer {
                due: Instant::now() + delay,
                pending,
            });
        } else {
            self.suspended = Some((delay, pending));
        }
    }

    fn suspend(&mut self) {
        if let Some(timer) = self.timer.take() {
            let remaining = timer.due.saturating_duration_since(Instant::now());
            debug!(match_id = %self.session.id(), ?remaining, "timer suspended");
            self.suspended = Some((remaining, timer.pending));
        }
    }

    fn unsuspend(&mut self) {
        if let Some((remaining, pending)) = self.suspended.take() {
            self.arm(remaining, pending);
        }
    }

    // Drops timers and in-flight AI answers that belong to a state that no longer exists.
    fn reset_pending(&mut self) {
        self.timer = None;
        self.suspended = None;
        self.deciding = false;
        self.epoch += 1;
    }

    fn think_delay(&mut self) -> Duration {
        let timing = self.services.timing;
        let min = timing.think_min.as_millis() as u64;
        let max = (timing.think_max.as_millis() as u64).max(min);
        Duration::from_millis(self.rng.gen_range(min..=max))
    }

    fn start_decision(&mut self) {
        let Some(request) = self.session.ai_request() else {
            return;
        };
        self.deciding = true;
        let chooser = Arc::clone(&self.services.chooser);
        let decisions = self.decisions.clone();
        let epoch = self.epoch;
        tokio::spawn(async move {
            let choice = chooser.choose(&request).await;
            let _ = decisions.send(Decision { epoch, choice });
        });
    }

    fn on_decision(&mut self, decision: Decision) {
        if decision.epoch != self.epoch {
            debug!(match_id = %self.session.id(), "stale AI decision dropped");
            return;
        }
        self.deciding = false;
        match self.session.resolve_choice(decision.choice) {
            Some(token) => {
                let delay = self.think_delay();
                self.arm(delay, Pending::AiMove(token));
            }
            None => self.schedule(),
        }
    }

    fn fire(&mut self) {
        let Some(timer) = self.timer.take() else {
            return;
        };
        let result = match timer.pending {
            Pending::ResolveRoll => {
                let value = roll_die(&mut self.rng);
                self.session.resolve_roll(value).map(|_| ())
            }
            Pending::AiRoll => self.session.begin_roll(),
            Pending::AiMove(token) => match self.session.play(token) {
                Ok(outcome) => {
                    self.record(outcome);
                    Ok(())
                }
                Err(err) => Err(err),
            },
            Pending::AutoSkip => self.session.skip(),
        };
        match result {
            Ok(()) => {
                self.schedule();
                self.publish();
            }
            Err(err) => {
                warn!(match_id = %self.session.id(), %err, pending = timer.pending.label(), "timed action rejected");
                self.schedule();
            }
        }
    }

    fn record(&self, outcome: PlayOutcome) {
        let Some(record) = outcome.completed else {
            return;
        };
        if let Err(err) = self.services.stores.record_match(record) {
            warn!(match_id = %self.session.id(), %err, "failed to persist match history");
        }
    }
}
