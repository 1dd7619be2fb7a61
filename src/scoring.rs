//! Pure scoring core: outcome resolution, settlement diffs, standings, and
//! leaderboard ranking. Everything here is a function of its inputs so the
//! contest rules can be tested without a database; the transactional engine
//! in `settle` and the read-time views in `api`/`standings` feed it rows.

use {
    std::{
        cmp::Reverse,
        collections::HashMap,
    },
    chrono::prelude::*,
    itertools::Itertools as _,
    serde::Serialize,
    crate::{
        matchup::{
            Matchup,
            Stage,
        },
        team::Team,
    },
};

/// Higher score wins, equal scores are a tie (valid in the regular season).
pub(crate) fn resolve_winner(home_score: i32, away_score: i32, home_team_id: i32, away_team_id: i32) -> Option<i32> {
    if home_score > away_score {
        Some(home_team_id)
    } else if away_score > home_score {
        Some(away_team_id)
    } else {
        None
    }
}

/// A pick as seen by the settlement transition.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PickState {
    pub(crate) pick_id: i32,
    pub(crate) user_id: i32,
    pub(crate) selected_team_id: i32,
    pub(crate) was_correct: Option<bool>,
}

/// What settlement has to persist for one pick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PickUpdate {
    pub(crate) pick_id: i32,
    pub(crate) user_id: i32,
    pub(crate) is_correct: bool,
    pub(crate) score_delta: i32,
}

/// Settlement as an explicit state transition: given the matchup's previous
/// finished state and the newly resolved winner, computes the full diff for
/// every pick. Points previously awarded are subtracted and points for the new
/// outcome added in one delta, so re-settling any number of times (including
/// with identical scores) never double- or under-counts.
pub(crate) fn settlement_diff(stage: Stage, was_finished: bool, new_winner: Option<i32>, picks: &[PickState]) -> Vec<PickUpdate> {
    let points = stage.point_value();
    picks.iter().map(|pick| {
        let old_points = if was_finished && pick.was_correct == Some(true) { points } else { 0 };
        let is_correct = new_winner.is_some_and(|winner| pick.selected_team_id == winner);
        let new_points = if is_correct { points } else { 0 };
        PickUpdate {
            pick_id: pick.pick_id,
            user_id: pick.user_id,
            is_correct,
            score_delta: new_points - old_points,
        }
    }).collect()
}

/// Per-user score deltas for deleting a matchup: the diff back to the
/// unsettled state. Deleting a never-finished matchup awards nothing and thus
/// reverses nothing.
pub(crate) fn reversal_deltas(stage: Stage, was_finished: bool, picks: &[PickState]) -> Vec<(i32, i32)> {
    if !was_finished {
        return Vec::default()
    }
    let points = stage.point_value();
    picks.iter()
        .filter(|pick| pick.was_correct == Some(true))
        .map(|pick| (pick.user_id, -points))
        .collect()
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct PickRef {
    pub(crate) user_id: i32,
    pub(crate) matchup_id: i32,
    pub(crate) selected_team_id: i32,
}

/// Replays every pick over the currently finished matchups. The result is the
/// score every user *should* have; reconciliation compares it against the
/// maintained `users.score` counters.
pub(crate) fn replay_scores(matchups: &[Matchup], picks: &[PickRef]) -> HashMap<i32, i32> {
    let by_id = matchups.iter().map(|matchup| (matchup.id, matchup)).collect::<HashMap<_, _>>();
    let mut scores = HashMap::default();
    for pick in picks {
        let Some(matchup) = by_id.get(&pick.matchup_id) else { continue };
        if matchup.is_finished && matchup.winner_id == Some(pick.selected_team_id) {
            *scores.entry(pick.user_id).or_insert(0) += matchup.stage.point_value();
        }
    }
    scores
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TeamStanding {
    #[serde(flatten)]
    pub(crate) team: Team,
    pub(crate) wins: u32,
    pub(crate) losses: u32,
    pub(crate) ties: u32,
    pub(crate) points_for: i32,
    pub(crate) points_against: i32,
    pub(crate) pct: String,
    pub(crate) diff: i32,
}

/// Derives the full standings table from the finished-matchup set. Always a
/// live recomputation; teams with no finished games still appear, at
/// pct "0.000". Default order: pct descending, then (wins - losses)
/// descending.
pub(crate) fn compute_standings(teams: Vec<Team>, finished: &[Matchup]) -> Vec<TeamStanding> {
    let mut standings = teams.into_iter().map(|team| {
        let (mut wins, mut losses, mut ties) = (0, 0, 0);
        let (mut points_for, mut points_against) = (0, 0);
        for matchup in finished {
            let (scored, allowed) = if matchup.home_team_id == team.id {
                (matchup.home_score, matchup.away_score)
            } else if matchup.away_team_id == team.id {
                (matchup.away_score, matchup.home_score)
            } else {
                continue
            };
            points_for += scored.unwrap_or(0);
            points_against += allowed.unwrap_or(0);
            if matchup.winner_id == Some(team.id) {
                wins += 1;
            } else if matchup.winner_id.is_none() {
                ties += 1;
            } else {
                losses += 1;
            }
        }
        let total_games = wins + losses + ties;
        let pct = if total_games > 0 {
            (f64::from(wins) + 0.5 * f64::from(ties)) / f64::from(total_games)
        } else {
            0.0
        };
        (pct, TeamStanding {
            diff: points_for - points_against,
            pct: format!("{pct:.3}"),
            team, wins, losses, ties, points_for, points_against,
        })
    }).collect_vec();
    standings.sort_unstable_by(|(pct1, standing1), (pct2, standing2)| {
        pct2.total_cmp(pct1)
            .then_with(|| (i64::from(standing2.wins) - i64::from(standing2.losses)).cmp(&(i64::from(standing1.wins) - i64::from(standing1.losses))))
    });
    standings.into_iter().map(|(_, standing)| standing).collect()
}

/// One pick row feeding the weekly ranking.
#[derive(Debug, Clone)]
pub(crate) struct WeeklyPick {
    pub(crate) user_id: i32,
    pub(crate) username: String,
    pub(crate) is_correct: Option<bool>,
    pub(crate) updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WeeklyRanking {
    pub(crate) id: i32,
    pub(crate) username: String,
    pub(crate) correct_picks: u32,
    pub(crate) last_pick_date: DateTime<Utc>,
    pub(crate) winner: bool,
}

/// Groups a week's picks by user and ranks by correct picks, breaking ties by
/// earliest final submission: `last_pick_date` is the max `updated_at` of the
/// user's picks, i.e. when they finished submitting for the week. Only the
/// top entry is flagged as the week's winner.
pub(crate) fn rank_weekly(picks: Vec<WeeklyPick>) -> Vec<WeeklyRanking> {
    let mut ranking = picks.into_iter()
        .into_group_map_by(|pick| pick.user_id)
        .into_iter()
        .map(|(user_id, picks)| WeeklyRanking {
            id: user_id,
            username: picks[0].username.clone(),
            correct_picks: picks.iter().filter(|pick| pick.is_correct == Some(true)).count() as u32,
            last_pick_date: picks.iter().map(|pick| pick.updated_at).max().expect("group is nonempty"),
            winner: false,
        })
        .collect_vec();
    ranking.sort_unstable_by_key(|entry| (Reverse(entry.correct_picks), entry.last_pick_date, entry.id));
    if let Some(first) = ranking.first_mut() {
        first.winner = true;
    }
    ranking
}

#[cfg(test)]
mod tests {
    use {
        chrono::TimeDelta,
        crate::team::{
            Conference,
            Division,
        },
        super::*,
    };

    fn team(id: i32, abbreviation: &str) -> Team {
        Team {
            id,
            name: format!("Team {abbreviation}"),
            city: format!("City {abbreviation}"),
            abbreviation: abbreviation.to_owned(),
            logo_url: None,
            conference: Conference::Afc,
            division: Division::East,
        }
    }

    fn matchup(id: i32, stage: Stage, home_team_id: i32, away_team_id: i32) -> Matchup {
        Matchup {
            id,
            week: 1,
            stage,
            home_team_id,
            away_team_id,
            start_time: Utc::now(),
            home_score: None,
            away_score: None,
            winner_id: None,
            is_finished: false,
        }
    }

    #[derive(Debug, Clone)]
    struct TestPick {
        id: i32,
        user_id: i32,
        matchup_id: i32,
        selected_team_id: i32,
        is_correct: Option<bool>,
    }

    /// In-memory contest applying the same transitions the settlement engine
    /// persists, so settle/resettle/delete sequences can be checked against
    /// the replayed score invariant.
    #[derive(Default)]
    struct Contest {
        matchups: Vec<Matchup>,
        picks: Vec<TestPick>,
        scores: HashMap<i32, i32>,
    }

    impl Contest {
        fn add_matchup(&mut self, matchup: Matchup) {
            self.matchups.push(matchup);
        }

        fn add_pick(&mut self, user_id: i32, matchup_id: i32, selected_team_id: i32) {
            let id = self.picks.len() as i32 + 1;
            self.picks.push(TestPick { id, user_id, matchup_id, selected_team_id, is_correct: None });
        }

        fn pick_states(&self, matchup_id: i32) -> Vec<PickState> {
            self.picks.iter()
                .filter(|pick| pick.matchup_id == matchup_id)
                .map(|pick| PickState {
                    pick_id: pick.id,
                    user_id: pick.user_id,
                    selected_team_id: pick.selected_team_id,
                    was_correct: pick.is_correct,
                })
                .collect()
        }

        fn settle(&mut self, matchup_id: i32, home_score: i32, away_score: i32) {
            let states = self.pick_states(matchup_id);
            let matchup = self.matchups.iter_mut().find(|matchup| matchup.id == matchup_id).expect("settling unknown matchup");
            let winner_id = resolve_winner(home_score, away_score, matchup.home_team_id, matchup.away_team_id);
            let updates = settlement_diff(matchup.stage, matchup.is_finished, winner_id, &states);
            matchup.home_score = Some(home_score);
            matchup.away_score = Some(away_score);
            matchup.winner_id = winner_id;
            matchup.is_finished = true;
            for update in updates {
                self.picks.iter_mut().find(|pick| pick.id == update.pick_id).expect("update for unknown pick").is_correct = Some(update.is_correct);
                *self.scores.entry(update.user_id).or_insert(0) += update.score_delta;
            }
        }

        fn delete_matchup(&mut self, matchup_id: i32) {
            let states = self.pick_states(matchup_id);
            let matchup = self.matchups.iter().find(|matchup| matchup.id == matchup_id).expect("deleting unknown matchup");
            for (user_id, delta) in reversal_deltas(matchup.stage, matchup.is_finished, &states) {
                *self.scores.entry(user_id).or_insert(0) += delta;
            }
            self.picks.retain(|pick| pick.matchup_id != matchup_id);
            self.matchups.retain(|matchup| matchup.id != matchup_id);
        }

        /// `users.score` must equal the replay of all picks over currently
        /// finished matchups, at all times.
        fn assert_score_invariant(&self) {
            let refs = self.picks.iter()
                .map(|pick| PickRef { user_id: pick.user_id, matchup_id: pick.matchup_id, selected_team_id: pick.selected_team_id })
                .collect_vec();
            let expected = replay_scores(&self.matchups, &refs);
            for (user_id, score) in &self.scores {
                assert_eq!(*score, expected.get(user_id).copied().unwrap_or(0), "score drift for user {user_id}");
            }
        }
    }

    #[test]
    fn resolve_winner_handles_ties() {
        assert_eq!(resolve_winner(24, 17, 1, 2), Some(1));
        assert_eq!(resolve_winner(17, 24, 1, 2), Some(2));
        assert_eq!(resolve_winner(20, 20, 1, 2), None);
    }

    #[test]
    fn settle_awards_stage_weighted_points() {
        let mut contest = Contest::default();
        contest.add_matchup(matchup(1, Stage::Regular, 1, 2));
        contest.add_matchup(matchup(2, Stage::Superbowl, 3, 4));
        contest.add_pick(100, 1, 1);
        contest.add_pick(100, 2, 3);
        contest.add_pick(200, 1, 2);
        contest.settle(1, 21, 14);
        contest.settle(2, 31, 28);
        assert_eq!(contest.scores[&100], 1 + 3);
        assert_eq!(contest.scores[&200], 0);
        contest.assert_score_invariant();
    }

    #[test]
    fn resettlement_with_same_scores_is_idempotent() {
        let mut contest = Contest::default();
        contest.add_matchup(matchup(1, Stage::Wildcard, 1, 2));
        contest.add_pick(100, 1, 1);
        contest.add_pick(200, 1, 2);
        contest.settle(1, 21, 14);
        let before = contest.scores.clone();
        contest.settle(1, 21, 14);
        assert_eq!(contest.scores, before);
        contest.assert_score_invariant();
    }

    #[test]
    fn resettlement_correction_moves_points() {
        let mut contest = Contest::default();
        contest.add_matchup(matchup(1, Stage::Divisional, 1, 2));
        contest.add_pick(100, 1, 1);
        contest.add_pick(200, 1, 2);
        contest.settle(1, 21, 14);
        assert_eq!(contest.scores[&100], 2);
        assert_eq!(contest.scores[&200], 0);
        // score correction: away team actually won
        contest.settle(1, 14, 21);
        assert_eq!(contest.scores[&100], 0);
        assert_eq!(contest.scores[&200], 2);
        contest.assert_score_invariant();
    }

    #[test]
    fn resettlement_to_tie_revokes_points() {
        let mut contest = Contest::default();
        contest.add_matchup(matchup(1, Stage::Regular, 1, 2));
        contest.add_pick(100, 1, 1);
        contest.settle(1, 21, 14);
        assert_eq!(contest.scores[&100], 1);
        contest.settle(1, 17, 17);
        assert_eq!(contest.scores[&100], 0);
        contest.assert_score_invariant();
    }

    #[test]
    fn deleting_finished_matchup_restores_scores() {
        let mut contest = Contest::default();
        contest.add_matchup(matchup(1, Stage::Conference, 1, 2));
        contest.add_pick(100, 1, 1);
        contest.add_pick(200, 1, 2);
        contest.settle(1, 21, 14);
        contest.delete_matchup(1);
        assert_eq!(contest.scores[&100], 0);
        assert_eq!(contest.scores[&200], 0);
        contest.assert_score_invariant();
    }

    #[test]
    fn deleting_unfinished_matchup_changes_no_scores() {
        let mut contest = Contest::default();
        contest.add_matchup(matchup(1, Stage::Regular, 1, 2));
        contest.add_pick(100, 1, 1);
        contest.delete_matchup(1);
        assert!(contest.scores.values().all(|score| *score == 0));
        contest.assert_score_invariant();
    }

    #[test]
    fn score_invariant_holds_across_mixed_sequences() {
        let mut contest = Contest::default();
        contest.add_matchup(matchup(1, Stage::Regular, 1, 2));
        contest.add_matchup(matchup(2, Stage::Regular, 3, 4));
        contest.add_matchup(matchup(3, Stage::Superbowl, 1, 3));
        for user_id in [100, 200, 300] {
            contest.add_pick(user_id, 1, if user_id == 200 { 2 } else { 1 });
            contest.add_pick(user_id, 2, if user_id == 300 { 4 } else { 3 });
            contest.add_pick(user_id, 3, 1);
        }
        contest.settle(1, 21, 14);
        contest.assert_score_invariant();
        contest.settle(2, 10, 10);
        contest.assert_score_invariant();
        contest.settle(1, 14, 21);
        contest.assert_score_invariant();
        contest.settle(2, 10, 13);
        contest.assert_score_invariant();
        contest.settle(3, 40, 3);
        contest.assert_score_invariant();
        contest.delete_matchup(1);
        contest.assert_score_invariant();
        contest.settle(3, 3, 40);
        contest.assert_score_invariant();
        contest.delete_matchup(3);
        contest.assert_score_invariant();
    }

    #[test]
    fn standings_from_single_finished_game() {
        let teams = vec![team(1, "A"), team(2, "B"), team(3, "C")];
        let finished = vec![Matchup {
            home_score: Some(24),
            away_score: Some(17),
            winner_id: Some(1),
            is_finished: true,
            ..matchup(1, Stage::Regular, 1, 2)
        }];
        let standings = compute_standings(teams, &finished);
        assert_eq!(standings[0].team.id, 1);
        assert_eq!((standings[0].wins, standings[0].losses, standings[0].ties), (1, 0, 0));
        assert_eq!(standings[0].pct, "1.000");
        assert_eq!(standings[0].diff, 7);
        let b = standings.iter().find(|standing| standing.team.id == 2).expect("team B missing");
        assert_eq!((b.wins, b.losses, b.ties), (0, 1, 0));
        assert_eq!(b.pct, "0.000");
        assert_eq!(b.diff, -7);
        // a team with no finished games still appears
        let c = standings.iter().find(|standing| standing.team.id == 3).expect("team C missing");
        assert_eq!(c.pct, "0.000");
        assert_eq!((c.wins, c.losses, c.ties), (0, 0, 0));
    }

    #[test]
    fn standings_count_ties_as_half_wins() {
        let teams = vec![team(1, "A"), team(2, "B")];
        let finished = vec![
            Matchup { home_score: Some(20), away_score: Some(17), winner_id: Some(1), is_finished: true, ..matchup(1, Stage::Regular, 1, 2) },
            Matchup { home_score: Some(14), away_score: Some(14), winner_id: None, is_finished: true, ..matchup(2, Stage::Regular, 1, 2) },
        ];
        let standings = compute_standings(teams, &finished);
        assert_eq!(standings[0].team.id, 1);
        assert_eq!(standings[0].pct, "0.750");
        assert_eq!(standings[1].pct, "0.250");
    }

    #[test]
    fn standings_break_pct_ties_by_win_loss_margin() {
        // 2-0-0 and 1-0-1 both beat 0-0-2 on pct; 2-0-0 leads on wins - losses
        let teams = vec![team(1, "A"), team(2, "B"), team(3, "C"), team(4, "D")];
        let finished = vec![
            Matchup { home_score: Some(20), away_score: Some(10), winner_id: Some(1), is_finished: true, ..matchup(1, Stage::Regular, 1, 4) },
            Matchup { home_score: Some(20), away_score: Some(10), winner_id: Some(1), is_finished: true, ..matchup(2, Stage::Regular, 1, 4) },
            Matchup { home_score: Some(10), away_score: Some(10), winner_id: None, is_finished: true, ..matchup(3, Stage::Regular, 2, 3) },
            Matchup { home_score: Some(20), away_score: Some(10), winner_id: Some(2), is_finished: true, ..matchup(4, Stage::Regular, 2, 3) },
        ];
        let standings = compute_standings(teams, &finished);
        assert_eq!(standings.iter().map(|standing| standing.team.id).collect_vec(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn weekly_ranking_breaks_ties_by_earliest_submission() {
        let base = Utc::now();
        let picks = vec![
            // user X: 3 correct, finished submitting at 10:00
            WeeklyPick { user_id: 1, username: "x".to_owned(), is_correct: Some(true), updated_at: base },
            WeeklyPick { user_id: 1, username: "x".to_owned(), is_correct: Some(true), updated_at: base - TimeDelta::minutes(30) },
            WeeklyPick { user_id: 1, username: "x".to_owned(), is_correct: Some(true), updated_at: base - TimeDelta::minutes(10) },
            // user Y: 3 correct, finished at 10:05
            WeeklyPick { user_id: 2, username: "y".to_owned(), is_correct: Some(true), updated_at: base + TimeDelta::minutes(5) },
            WeeklyPick { user_id: 2, username: "y".to_owned(), is_correct: Some(true), updated_at: base - TimeDelta::hours(1) },
            WeeklyPick { user_id: 2, username: "y".to_owned(), is_correct: Some(true), updated_at: base - TimeDelta::hours(2) },
            // user Z: 1 correct, 2 wrong/unsettled
            WeeklyPick { user_id: 3, username: "z".to_owned(), is_correct: Some(true), updated_at: base - TimeDelta::days(1) },
            WeeklyPick { user_id: 3, username: "z".to_owned(), is_correct: Some(false), updated_at: base - TimeDelta::days(1) },
            WeeklyPick { user_id: 3, username: "z".to_owned(), is_correct: None, updated_at: base - TimeDelta::days(1) },
        ];
        let ranking = rank_weekly(picks);
        assert_eq!(ranking.iter().map(|entry| entry.id).collect_vec(), vec![1, 2, 3]);
        assert_eq!(ranking[0].correct_picks, 3);
        assert_eq!(ranking[0].last_pick_date, base);
        assert!(ranking[0].winner);
        assert!(!ranking[1].winner);
        assert!(!ranking[2].winner);
        assert_eq!(ranking[2].correct_picks, 1);
    }

    #[test]
    fn weekly_ranking_of_no_picks_is_empty() {
        assert!(rank_weekly(Vec::default()).is_empty());
    }
}
