use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperatorAction {
    Enable,
    Disable,
    Takeoff,
    Land,
    Shutdown,
}

impl OperatorAction {
    pub const COUNT: usize = 5;
    pub const ALL: [OperatorAction; Self::COUNT] = [
        OperatorAction::Enable,
        OperatorAction::Disable,
        OperatorAction::Takeoff,
        OperatorAction::Land,
        OperatorAction::Shutdown,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    /// Single letters follow the keyboard bindings the operators are used to.
    pub fn from_token(tok: &str) -> Option<Self> {
        match tok.trim().to_ascii_lowercase().as_str() {
            "e" | "enable" => Some(OperatorAction::Enable),
            "q" | "disable" => Some(OperatorAction::Disable),
            "f" | "takeoff" => Some(OperatorAction::Takeoff),
            "r" | "land" => Some(OperatorAction::Land),
            "x" | "shutdown" => Some(OperatorAction::Shutdown),
            _ => None,
        }
    }
}

impl fmt::Display for OperatorAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OperatorAction::Enable => "enable",
            OperatorAction::Disable => "disable",
            OperatorAction::Takeoff => "takeoff",
            OperatorAction::Land => "land",
            OperatorAction::Shutdown => "shutdown",
        })
    }
}

/// Poll-based operator triggers. `poll` never blocks.
pub trait OperatorInput: Send {
    /// Actions asserted since the previous poll, in canonical order, without duplicates.
    fn poll(&mut self) -> Vec<OperatorAction>;
}

/// Line-oriented operator console: every line holds one token. Asserted
/// actions stay latched until the control loop polls them.
pub struct StdinOperator {
    pending: Arc<Mutex<[bool; OperatorAction::COUNT]>>,
    reader: JoinHandle<()>,
}

impl StdinOperator {
    pub fn stdin() -> Self {
        info!("operator: keys e=enable q=disable f=takeoff r=land x=shutdown (one per line)");
        Self::from_reader(tokio::io::stdin())
    }

    pub fn from_reader<R>(reader: R) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let pending = Arc::new(Mutex::new([false; OperatorAction::COUNT]));
        let latch = pending.clone();
        let reader = tokio::spawn(async move {
            let mut lines = BufReader::new(reader).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        match OperatorAction::from_token(&line) {
                            Some(a) => {
                                debug!("operator: {} requested", a);
                                latch.lock().unwrap_or_else(PoisonError::into_inner)[a.index()] = true;
                            }
                            None => warn!("operator: unknown command {:?}", line.trim()),
                        }
                    }
                    Ok(None) => {
                        info!("operator: input closed");
                        break;
                    }
                    Err(e) => {
                        warn!("operator: read failed: {}", e);
                        break;
                    }
                }
            }
        });
        Self { pending, reader }
    }

    pub fn is_reading(&self) -> bool {
        !self.reader.is_finished()
    }
}

impl OperatorInput for StdinOperator {
    fn poll(&mut self) -> Vec<OperatorAction> {
        let mut p = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        let out = OperatorAction::ALL.into_iter().filter(|a| p[a.index()]).collect();
        *p = [false; OperatorAction::COUNT];
        out
    }
}

impl Drop for StdinOperator {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Fixed per-tick action script; empty once exhausted.
#[derive(Debug, Default)]
pub struct ScriptedOperator {
    ticks: VecDeque<Vec<OperatorAction>>,
}

impl ScriptedOperator {
    pub fn new<I>(ticks: I) -> Self
    where
        I: IntoIterator<Item = Vec<OperatorAction>>,
    {
        Self { ticks: ticks.into_iter().collect() }
    }
}

impl OperatorInput for ScriptedOperator {
    fn poll(&mut self) -> Vec<OperatorAction> {
        self.ticks.pop_front().unwrap_or_default()
    }
}
