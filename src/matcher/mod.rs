//! Giver/recipient assignment for a matching run.
//!
//! Members are shuffled and paired circularly: position `i` gives to
//! position `i + 1` (wrapping), which yields a single cycle with no member
//! giving to themselves. A giver whose previous recipient lands next to them
//! is moved on to the next acceptable member further along the shuffled order.
//!
//! The substitution is local. It does not check whether the substitute
//! already receives from someone else, so under adversarial history a member
//! can end up receiving twice while another receives nothing.

use rand::seq::SliceRandom;

/// Matching input for one member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub id: String,
    /// Who this member gave to last time, if anyone
    pub last_recipient: Option<String>,
}

impl Candidate {
    pub fn new(id: impl Into<String>, last_recipient: Option<&str>) -> Self {
        Self {
            id: id.into(),
            last_recipient: last_recipient.map(str::to_string),
        }
    }

    fn accepts(&self, recipient: &Candidate) -> bool {
        self.id != recipient.id && self.last_recipient.as_deref() != Some(recipient.id.as_str())
    }
}

/// One giver/recipient assignment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Pair {
    pub giver: String,
    pub recipient: String,
}

/// Why no assignment could be produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchingFailure {
    /// Fewer than two members
    TooFewMembers { count: usize },
    /// Every alternative for this giver was themselves or their last recipient
    NoValidAssignment { giver: String },
}

impl std::fmt::Display for MatchingFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MatchingFailure::TooFewMembers { count } => {
                write!(f, "at least 2 members are required, got {}", count)
            }
            MatchingFailure::NoValidAssignment { giver } => {
                write!(f, "no valid recipient for member {}", giver)
            }
        }
    }
}

impl std::error::Error for MatchingFailure {}

/// Source of the random member order for a run.
pub trait Shuffler: Send + Sync {
    fn shuffle(&self, members: &mut [Candidate]);
}

/// Fisher-Yates over the thread-local RNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomShuffler;

impl Shuffler for RandomShuffler {
    fn shuffle(&self, members: &mut [Candidate]) {
        members.shuffle(&mut rand::thread_rng());
    }
}

/// Shuffle the members and pair them circularly.
pub fn compute_assignment(
    members: &[Candidate],
    shuffler: &dyn Shuffler,
) -> Result<Vec<Pair>, MatchingFailure> {
    let mut order = members.to_vec();
    shuffler.shuffle(&mut order);
    assign_in_order(&order)
}

/// Pair an already-shuffled order circularly, steering around last recipients.
///
/// All-or-nothing: a single giver without an acceptable recipient fails the
/// whole assignment.
pub fn assign_in_order(order: &[Candidate]) -> Result<Vec<Pair>, MatchingFailure> {
    let n = order.len();
    if n < 2 {
        return Err(MatchingFailure::TooFewMembers { count: n });
    }

    let mut pairs = Vec::with_capacity(n);
    for (i, giver) in order.iter().enumerate() {
        let mut recipient = &order[(i + 1) % n];

        if !giver.accepts(recipient) {
            recipient = (1..n)
                .map(|attempt| &order[(i + 1 + attempt) % n])
                .find(|candidate| giver.accepts(candidate))
                .ok_or_else(|| MatchingFailure::NoValidAssignment {
                    giver: giver.id.clone(),
                })?;
            tracing::debug!(
                giver = %giver.id,
                recipient = %recipient.id,
                "Steered giver away from last recipient"
            );
        }

        pairs.push(Pair {
            giver: giver.id.clone(),
            recipient: recipient.id.clone(),
        });
    }

    Ok(pairs)
}
