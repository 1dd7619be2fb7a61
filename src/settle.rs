//! Transactional score settlement: turning a submitted final score into a
//! winner determination and point awards, and reversing awards when a
//! finished matchup is deleted. Both paths hold the per-matchup lock and run
//! inside a single transaction with the matchup row locked, so scores either
//! fully move to the new outcome or stay untouched.

use {
    std::{
        collections::HashMap,
        sync::Arc,
    },
    itertools::Itertools as _,
    sqlx::{
        PgPool,
        Postgres,
        Transaction,
    },
    tokio::sync::{
        Mutex,
        OwnedMutexGuard,
    },
    crate::{
        audit,
        matchup::Matchup,
        pick::Pick,
        scoring::{
            self,
            PickRef,
            PickState,
        },
        user::User,
    },
};

#[derive(Debug, thiserror::Error)]
pub(crate) enum Error {
    #[error("matchup not found")]
    MatchupNotFound,
    #[error(transparent)] Sql(#[from] sqlx::Error),
}

/// Application-level serialization of settlement per matchup, on top of the
/// `FOR UPDATE` row lock. Two concurrent settle calls for the same matchup
/// (an admin double-submitting a correction) must not interleave their
/// read-diff-write sequences.
#[derive(Default)]
pub(crate) struct MatchupLocks(std::sync::Mutex<HashMap<i32, Arc<Mutex<()>>>>);

impl MatchupLocks {
    pub(crate) async fn lock(&self, matchup_id: i32) -> OwnedMutexGuard<()> {
        let mutex = Arc::clone(self.0.lock().expect("matchup lock registry poisoned").entry(matchup_id).or_default());
        mutex.lock_owned().await
    }

    /// Drops the registry entry once nothing holds or awaits the lock, so the
    /// registry tracks the live schedule instead of growing monotonically.
    pub(crate) fn prune(&self, matchup_id: i32) {
        let mut registry = self.0.lock().expect("matchup lock registry poisoned");
        if registry.get(&matchup_id).is_some_and(|mutex| Arc::strong_count(mutex) == 1) {
            registry.remove(&matchup_id);
        }
    }
}

fn pick_states(picks: &[Pick]) -> Vec<PickState> {
    picks.iter().map(|pick| PickState {
        pick_id: pick.id,
        user_id: pick.user_id,
        selected_team_id: pick.selected_team_id,
        was_correct: pick.is_correct,
    }).collect()
}

async fn apply_score_deltas(transaction: &mut Transaction<'_, Postgres>, deltas: impl IntoIterator<Item = (i32, i32)>) -> sqlx::Result<()> {
    for (user_id, delta) in deltas {
        if delta != 0 {
            sqlx::query("UPDATE users SET score = score + $1 WHERE id = $2")
                .bind(delta)
                .bind(user_id)
                .execute(&mut **transaction)
                .await?;
        }
    }
    Ok(())
}

/// Settles (or re-settles) a matchup with a final score. Computes the full
/// diff against the previous outcome, so corrections never double-count.
pub(crate) async fn settle(pool: &PgPool, locks: &MatchupLocks, acting_user: &User, matchup_id: i32, home_score: i32, away_score: i32) -> Result<(), Error> {
    let _guard = locks.lock(matchup_id).await;
    let mut transaction = pool.begin().await?;
    let matchup = Matchup::lock_for_update(&mut transaction, matchup_id).await?.ok_or(Error::MatchupNotFound)?;
    let picks = Pick::for_matchup(&mut transaction, matchup_id).await?;
    let winner_id = scoring::resolve_winner(home_score, away_score, matchup.home_team_id, matchup.away_team_id);
    let updates = scoring::settlement_diff(matchup.stage, matchup.is_finished, winner_id, &pick_states(&picks));
    sqlx::query("UPDATE matchups SET home_score = $2, away_score = $3, winner_id = $4, is_finished = TRUE, updated_at = now() WHERE id = $1")
        .bind(matchup_id)
        .bind(home_score)
        .bind(away_score)
        .bind(winner_id)
        .execute(&mut *transaction)
        .await?;
    for update in &updates {
        // deliberately does not bump picks.updated_at: that column records
        // when the user finished submitting and drives the weekly tie-break
        sqlx::query("UPDATE picks SET is_correct = $1 WHERE id = $2")
            .bind(update.is_correct)
            .bind(update.pick_id)
            .execute(&mut *transaction)
            .await?;
    }
    apply_score_deltas(&mut transaction, updates.iter().map(|update| (update.user_id, update.score_delta)).collect_vec()).await?;
    audit::record(&mut transaction, Some(acting_user.id), "GAME_SIMULATED", &format!("Matchup {matchup_id}: {away_score}-{home_score}")).await?;
    transaction.commit().await?;
    log::info!("matchup {matchup_id} settled {home_score}-{away_score}, winner {winner_id:?}, {} picks updated", updates.len());
    Ok(())
}

/// Deletes a matchup, first reversing any points it had awarded. Picks are
/// owned by the matchup and go with it.
pub(crate) async fn delete_matchup(pool: &PgPool, locks: &MatchupLocks, acting_user: &User, matchup_id: i32) -> Result<(), Error> {
    let guard = locks.lock(matchup_id).await;
    let mut transaction = pool.begin().await?;
    let matchup = Matchup::lock_for_update(&mut transaction, matchup_id).await?.ok_or(Error::MatchupNotFound)?;
    let picks = Pick::for_matchup(&mut transaction, matchup_id).await?;
    apply_score_deltas(&mut transaction, scoring::reversal_deltas(matchup.stage, matchup.is_finished, &pick_states(&picks))).await?;
    sqlx::query("DELETE FROM picks WHERE matchup_id = $1")
        .bind(matchup_id)
        .execute(&mut *transaction)
        .await?;
    sqlx::query("DELETE FROM matchups WHERE id = $1")
        .bind(matchup_id)
        .execute(&mut *transaction)
        .await?;
    audit::record(&mut transaction, Some(acting_user.id), "MATCHUP_DELETED", &format!("Matchup ID: {matchup_id}, Was Finished: {}", matchup.is_finished)).await?;
    transaction.commit().await?;
    drop(guard);
    locks.prune(matchup_id);
    log::info!("matchup {matchup_id} deleted (was finished: {})", matchup.is_finished);
    Ok(())
}

/// Wipes the schedule: all picks, all matchups, all scores back to zero.
pub(crate) async fn clear_schedule(pool: &PgPool) -> sqlx::Result<()> {
    let mut transaction = pool.begin().await?;
    sqlx::query("DELETE FROM picks").execute(&mut *transaction).await?;
    sqlx::query("DELETE FROM matchups").execute(&mut *transaction).await?;
    sqlx::query("UPDATE users SET score = 0").execute(&mut *transaction).await?;
    transaction.commit().await?;
    log::info!("schedule cleared, all scores reset");
    Ok(())
}

#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ScoreDrift {
    pub(crate) user_id: i32,
    pub(crate) username: String,
    pub(crate) stored: i32,
    pub(crate) expected: i32,
}

/// Replays all picks over the finished matchups and reports every user whose
/// maintained score differs. An empty result means the settlement invariant
/// holds.
pub(crate) async fn reconcile(transaction: &mut Transaction<'_, Postgres>) -> sqlx::Result<Vec<ScoreDrift>> {
    let matchups = Matchup::finished(transaction).await?;
    let picks = sqlx::query_as::<_, (i32, i32, i32)>("SELECT user_id, matchup_id, selected_team_id FROM picks")
        .fetch_all(&mut **transaction)
        .await?
        .into_iter()
        .map(|(user_id, matchup_id, selected_team_id)| PickRef { user_id, matchup_id, selected_team_id })
        .collect_vec();
    let expected = scoring::replay_scores(&matchups, &picks);
    let users = User::all(transaction).await?;
    Ok(users.into_iter()
        .filter_map(|user| {
            let expected = expected.get(&user.id).copied().unwrap_or(0);
            (user.score != expected).then_some(ScoreDrift {
                user_id: user.id,
                username: user.username,
                stored: user.score,
                expected,
            })
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn deleted_matchup_lock_is_pruned_once_released() {
        let locks = MatchupLocks::default();
        let guard = locks.lock(7).await;
        // still held, so the entry must survive
        locks.prune(7);
        assert_eq!(locks.0.lock().expect("matchup lock registry poisoned").len(), 1);
        drop(guard);
        locks.prune(7);
        assert!(locks.0.lock().expect("matchup lock registry poisoned").is_empty());
    }

    /// Serialized settle transitions over shared in-memory scores. Each task
    /// snapshots the pick states, yields to encourage interleaving, then
    /// applies the diff; without the per-matchup lock the snapshot would go
    /// stale and the score invariant would break.
    #[tokio::test]
    async fn concurrent_settlement_of_one_matchup_serializes() {
        use crate::matchup::Stage;

        struct SimState {
            was_finished: bool,
            picks: Vec<PickState>,
            scores: HashMap<i32, i32>,
        }

        let locks = Arc::new(MatchupLocks::default());
        let state = Arc::new(std::sync::Mutex::new(SimState {
            was_finished: false,
            picks: (0..8).map(|i| PickState {
                pick_id: i,
                user_id: 100 + i,
                selected_team_id: if i % 2 == 0 { 1 } else { 2 },
                was_correct: None,
            }).collect(),
            scores: HashMap::default(),
        }));
        let mut tasks = Vec::default();
        for round in 0..32 {
            let locks = Arc::clone(&locks);
            let state = Arc::clone(&state);
            // alternate corrections between the two possible outcomes
            let (home_score, away_score) = if round % 2 == 0 { (21, 14) } else { (14, 21) };
            tasks.push(tokio::spawn(async move {
                let _guard = locks.lock(1).await;
                let (was_finished, picks) = {
                    let state = state.lock().expect("sim state poisoned");
                    (state.was_finished, state.picks.clone())
                };
                let winner_id = scoring::resolve_winner(home_score, away_score, 1, 2);
                let updates = scoring::settlement_diff(Stage::Superbowl, was_finished, winner_id, &picks);
                tokio::task::yield_now().await;
                let mut state = state.lock().expect("sim state poisoned");
                state.was_finished = true;
                for update in updates {
                    state.picks.iter_mut().find(|pick| pick.pick_id == update.pick_id).expect("missing pick").was_correct = Some(update.is_correct);
                    *state.scores.entry(update.user_id).or_insert(0) += update.score_delta;
                }
            }));
        }
        for task in tasks {
            task.await.expect("settlement task panicked");
        }
        // whichever correction landed last, exactly one side holds 3 points
        // per correct pick and the other zero
        let state = state.lock().expect("sim state poisoned");
        let winning_team = state.picks.iter().find(|pick| pick.was_correct == Some(true)).expect("no correct pick").selected_team_id;
        for pick in &state.picks {
            let expected = if pick.selected_team_id == winning_team { 3 } else { 0 };
            assert_eq!(state.scores.get(&pick.user_id).copied().unwrap_or(0), expected, "score drift for user {}", pick.user_id);
        }
    }
}
