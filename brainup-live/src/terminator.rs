//! End of a session and the final ranking.

use std::collections::HashSet;
use std::fmt::Write as _;

use crate::config::SessionConfig;
use crate::error::QuizError;
use crate::layout::SessionPaths;
use crate::model::{RosterSnapshot, ScoresSnapshot, SessionCode, SessionSnapshot, UserId};
use crate::registry::read_session;
use crate::store::StoreRef;
use crate::watch::Watch;

/// One row of a ranking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Standing {
    /// 1-based; tied scores share a rank
    pub rank: u32,
    pub identity: UserId,
    pub display_name: String,
    pub score: u32,
}

/// Rank everyone on the roster (plus anyone holding a score) by score,
/// highest first. Equal scores keep join order and share a rank.
pub fn rank_standings(roster: &RosterSnapshot, scores: &ScoresSnapshot) -> Vec<Standing> {
    let mut order: Vec<&UserId> = roster.identities();
    let known: HashSet<&UserId> = order.iter().copied().collect();
    order.extend(scores.scores.keys().filter(|id| !known.contains(id)));

    let mut rows: Vec<(&UserId, u32)> = order
        .into_iter()
        .map(|id| (id, scores.score_of(id)))
        .collect();
    rows.sort_by(|a, b| b.1.cmp(&a.1));

    let mut standings = Vec::with_capacity(rows.len());
    let mut rank = 0;
    let mut previous = None;
    for (position, (identity, score)) in rows.into_iter().enumerate() {
        if previous != Some(score) {
            rank = position as u32 + 1;
            previous = Some(score);
        }
        standings.push(Standing {
            rank,
            identity: identity.clone(),
            display_name: roster
                .display_name_of(identity)
                .unwrap_or(identity.as_str())
                .to_string(),
            score,
        });
    }
    standings
}

/// Scores of a finished session, best first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalRanking {
    pub code: SessionCode,
    pub title: String,
    pub standings: Vec<Standing>,
}

impl FinalRanking {
    pub fn from_session(session: &SessionSnapshot) -> Self {
        Self {
            code: session.code.clone(),
            title: session.title.clone(),
            standings: rank_standings(&session.roster, &session.scores),
        }
    }

    /// Everyone sharing the top rank.
    pub fn winners(&self) -> Vec<&Standing> {
        self.standings.iter().take_while(|s| s.rank == 1).collect()
    }

    pub fn len(&self) -> usize {
        self.standings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.standings.is_empty()
    }

    /// `Rank,Username,Score` export.
    pub fn to_csv(&self) -> String {
        let mut out = String::from("Rank,Username,Score\n");
        for s in &self.standings {
            let _ = writeln!(out, "{},{},{}", s.rank, csv_field(&s.display_name), s.score);
        }
        out
    }
}

fn csv_field(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

pub struct SessionTerminator {
    store: StoreRef,
    config: SessionConfig,
}

impl SessionTerminator {
    pub fn new(store: StoreRef, config: SessionConfig) -> Self {
        Self { store, config }
    }

    pub async fn watch_finished(&self, code: &SessionCode) -> Result<Watch<bool>, QuizError> {
        Watch::open(&self.store, SessionPaths::new(code).finished()).await
    }

    pub async fn watch_scores(&self, code: &SessionCode) -> Result<Watch<ScoresSnapshot>, QuizError> {
        Watch::open(&self.store, SessionPaths::new(code).scores()).await
    }

    /// Wait for the finished flag, then read the scores once.
    pub async fn await_final_ranking(&self, code: &SessionCode) -> Result<FinalRanking, QuizError> {
        let mut finished = self.watch_finished(code).await?;
        finished.wait_for(|finished| *finished).await?;
        finished.unsubscribe();

        let ranking = self.final_ranking(code).await?;
        log::info!(
            "Session {code} final ranking: {} participant(s), top score {}",
            ranking.len(),
            ranking.standings.first().map_or(0, |s| s.score)
        );
        Ok(ranking)
    }

    /// Ranking of a session that has already finished.
    pub async fn final_ranking(&self, code: &SessionCode) -> Result<FinalRanking, QuizError> {
        let session = read_session(&self.store, &self.config, code).await?;
        if !session.finished {
            return Err(QuizError::NotFinished(code.clone()));
        }
        Ok(FinalRanking::from_session(&session))
    }
}
