//! Unix socket server for admin commands.
//!
//! Newline-delimited JSON: one [`AdminCommand`] per line in, one
//! [`AdminResponse`] per line out. Engine calls are synchronous and run on
//! the blocking pool.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use trellis_engine::{
    CommissionRecord, Investment, InvestmentStatus, LevelFill, MatrixPosition, MatrixStatistics, MatrixTree,
    Participant, ReferralMatrix, ReferrerBalance, Store,
};
use trellis_matrix::{InvestmentId, Money, UserId};

/// Admin command sent over the socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum AdminCommand {
    /// Add or update a participant
    RegisterParticipant {
        user_id: UserId,
        #[serde(default)]
        referrer_id: Option<UserId>,
        #[serde(default)]
        tier: Option<String>,
    },
    /// Add or update an investment; amount in major units, e.g. "1500.00"
    RecordInvestment {
        investment_id: InvestmentId,
        user_id: UserId,
        amount: String,
        #[serde(default)]
        status: Option<InvestmentStatus>,
    },
    /// Place a user under a sponsor
    Place { sponsor_id: UserId, user_id: UserId },
    /// Deactivate a user's position
    Deactivate { user_id: UserId },
    /// Place the investor if needed, then post commissions
    ProcessInvestment { investment_id: InvestmentId },
    /// Post commissions for an investment
    PostCommissions { investment_id: InvestmentId },
    /// Tree view below a user
    MatrixView {
        user_id: UserId,
        #[serde(default)]
        max_level: Option<u8>,
    },
    /// Fill state of a user's window
    MatrixStatistics { user_id: UserId },
    /// Members per level below a user
    DownlineCounts {
        user_id: UserId,
        #[serde(default)]
        max_level: Option<u8>,
    },
    /// Commission balance of a referrer
    Balance { user_id: UserId },
    /// Ping (health check)
    Ping,
}

/// Response from admin command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AdminResponse {
    Ok {
        message: String,
    },
    Error {
        error: String,
    },
    Position {
        position: MatrixPosition,
        created: bool,
    },
    Commissions {
        #[serde(default)]
        placed: Option<MatrixPosition>,
        records: Vec<CommissionRecord>,
    },
    View {
        tree: MatrixTree,
    },
    Statistics {
        statistics: MatrixStatistics,
    },
    Counts {
        user_id: UserId,
        levels: Vec<LevelFill>,
    },
    Balance {
        balance: ReferrerBalance,
    },
    Pong,
}

impl From<trellis_engine::Error> for AdminResponse {
    fn from(e: trellis_engine::Error) -> Self {
        AdminResponse::Error { error: e.to_string() }
    }
}

/// Admin socket server.
pub struct AdminSocket<S: Store> {
    matrix: Arc<ReferralMatrix<S>>,
    socket_path: PathBuf,
}

impl<S: Store + 'static> AdminSocket<S> {
    /// Create a new admin socket server.
    pub fn new(matrix: Arc<ReferralMatrix<S>>, socket_path: impl Into<PathBuf>) -> Self {
        Self {
            matrix,
            socket_path: socket_path.into(),
        }
    }

    /// Run the admin socket server.
    pub async fn run(&self) -> Result<()> {
        // Remove existing socket file if present
        let _ = std::fs::remove_file(&self.socket_path);

        let listener = UnixListener::bind(&self.socket_path)?;
        tracing::info!("Admin socket listening on {:?}", self.socket_path);

        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let matrix = Arc::clone(&self.matrix);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, matrix).await {
                            tracing::error!("Admin connection error: {}", e);
                        }
                    });
                }
                Err(e) => {
                    tracing::error!("Failed to accept admin connection: {}", e);
                }
            }
        }
    }

    /// Get the socket path.
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }
}

async fn handle_connection<S: Store + 'static>(stream: UnixStream, matrix: Arc<ReferralMatrix<S>>) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    while reader.read_line(&mut line).await? > 0 {
        let response = match serde_json::from_str::<AdminCommand>(&line) {
            Ok(cmd) => execute_command(cmd, Arc::clone(&matrix)).await,
            Err(e) => AdminResponse::Error {
                error: format!("Invalid command: {}", e),
            },
        };

        let response_json = serde_json::to_string(&response)? + "\n";
        writer.write_all(response_json.as_bytes()).await?;
        line.clear();
    }

    Ok(())
}

/// Run one command against the engine on the blocking pool.
pub async fn execute_command<S: Store + 'static>(cmd: AdminCommand, matrix: Arc<ReferralMatrix<S>>) -> AdminResponse {
    if cmd == AdminCommand::Ping {
        return AdminResponse::Pong;
    }

    match tokio::task::spawn_blocking(move || execute_blocking(cmd, &matrix)).await {
        Ok(response) => response,
        Err(e) => {
            tracing::error!("Engine task failed: {}", e);
            AdminResponse::Error {
                error: format!("Engine task failed: {}", e),
            }
        }
    }
}

fn execute_blocking<S: Store>(cmd: AdminCommand, matrix: &ReferralMatrix<S>) -> AdminResponse {
    let depth = matrix.config().window_depth;

    match cmd {
        AdminCommand::RegisterParticipant {
            user_id,
            referrer_id,
            tier,
        } => {
            let mut participant = Participant::new(user_id);
            participant.referrer_id = referrer_id;
            participant.tier = tier;
            match matrix.register_participant(&participant) {
                Ok(()) => AdminResponse::Ok {
                    message: format!("Registered {}", user_id),
                },
                Err(e) => e.into(),
            }
        }

        AdminCommand::RecordInvestment {
            investment_id,
            user_id,
            amount,
            status,
        } => {
            let amount: Money = match amount.parse() {
                Ok(amount) => amount,
                Err(e) => {
                    return AdminResponse::Error {
                        error: format!("Invalid amount: {}", e),
                    }
                }
            };
            let investment = Investment::new(
                investment_id,
                user_id,
                amount,
                status.unwrap_or(InvestmentStatus::Active),
            );
            match matrix.record_investment(&investment) {
                Ok(()) => AdminResponse::Ok {
                    message: format!("Recorded {} of {} for {}", investment_id, amount, user_id),
                },
                Err(e) => e.into(),
            }
        }

        AdminCommand::Place { sponsor_id, user_id } => match matrix.find_or_create_position(sponsor_id, user_id) {
            Ok(placement) => AdminResponse::Position {
                created: placement.is_created(),
                position: placement.into_position(),
            },
            Err(e) => e.into(),
        },

        AdminCommand::Deactivate { user_id } => match matrix.deactivate_position(user_id) {
            Ok(Some(position)) => AdminResponse::Ok {
                message: format!("Deactivated {} ({})", user_id, position.id),
            },
            Ok(None) => AdminResponse::Error {
                error: format!("{} has no active position", user_id),
            },
            Err(e) => e.into(),
        },

        AdminCommand::ProcessInvestment { investment_id } => match matrix.process_investment(investment_id) {
            Ok(outcome) => AdminResponse::Commissions {
                placed: outcome.placement.filter(|p| p.is_created()).map(|p| p.into_position()),
                records: outcome.commissions,
            },
            Err(e) => e.into(),
        },

        AdminCommand::PostCommissions { investment_id } => match matrix.post_commissions(investment_id) {
            Ok(records) => AdminResponse::Commissions { placed: None, records },
            Err(e) => e.into(),
        },

        AdminCommand::MatrixView { user_id, max_level } => {
            match matrix.build_matrix_view(user_id, max_level.unwrap_or(depth)) {
                Ok(tree) => AdminResponse::View { tree },
                Err(e) => e.into(),
            }
        }

        AdminCommand::MatrixStatistics { user_id } => match matrix.matrix_statistics(user_id) {
            Ok(statistics) => AdminResponse::Statistics { statistics },
            Err(e) => e.into(),
        },

        AdminCommand::DownlineCounts { user_id, max_level } => {
            match matrix.calculate_downline_counts(user_id, max_level.unwrap_or(depth).min(depth)) {
                Ok(counts) => AdminResponse::Counts {
                    user_id,
                    levels: counts
                        .into_iter()
                        .map(|(level, members)| LevelFill {
                            level,
                            members,
                            capacity: trellis_matrix::slots_at_level(level),
                        })
                        .collect(),
                },
                Err(e) => e.into(),
            }
        }

        AdminCommand::Balance { user_id } => match matrix.referrer_balance(user_id) {
            Ok(balance) => AdminResponse::Balance { balance },
            Err(e) => e.into(),
        },

        AdminCommand::Ping => AdminResponse::Pong,
    }
}
