//! Recording match results on behalf of the Discord commands and the CLI.

use crate::{
    ledger::InvalidSide,
    mirror::{
        MirrorJob,
        MirrorQueue,
    },
    prelude::*,
    reconcile::{
        Reconciliation,
        reconcile,
    },
};

/// How many unrecorded matches `/record-match-results` offers at once.
pub(crate) const PENDING_MATCHES_LIMIT: i64 = 10;

#[derive(Debug, thiserror::Error)]
pub(crate) enum Error {
    #[error(transparent)] InvalidWinningSide(#[from] InvalidSide),
    #[error(transparent)] Sql(#[from] sqlx::Error),
    #[error("match ID {0} not found")]
    UnknownMatch(MatchId),
    #[error("match {0} already has a recorded result")]
    AlreadyRecorded(MatchId),
}

impl Error {
    /// Whether this was caused by the request rather than by the ledger.
    pub(crate) fn is_user_error(&self) -> bool {
        match self {
            Self::InvalidWinningSide(_) | Self::UnknownMatch(_) | Self::AlreadyRecorded(_) => true,
            Self::Sql(_) => false,
        }
    }
}

/// Records match results and queues the spreadsheet sync for each recorded match.
#[derive(Debug, Clone)]
pub(crate) struct MatchResults {
    mirror: Option<MirrorQueue>,
}

impl MatchResults {
    pub(crate) fn new(mirror: Option<MirrorQueue>) -> Self {
        Self { mirror }
    }

    /// Checks every requested result before recording any of them.
    ///
    /// Match IDs are deduplicated; the last winning team given for a match wins.
    /// Each match is checked again under a row lock right before it is written, so of two concurrent recorders only the first one counts.
    /// If that check fails partway through a batch, the matches before it stay recorded.
    pub(crate) async fn record<L: Ledger + ?Sized>(&self, ledger: &mut L, results: impl IntoIterator<Item = (MatchId, i64)>) -> Result<Reconciliation, Error> {
        let mut validated = BTreeMap::default();
        for (match_id, winning_team) in results {
            validated.insert(match_id, WinningSide::try_from(winning_team)?);
        }
        for match_id in validated.keys() {
            if ledger.count_rows(match_id).await? == 0 {
                return Err(Error::UnknownMatch(match_id.clone()))
            }
            if ledger.is_resolved(match_id).await? {
                return Err(Error::AlreadyRecorded(match_id.clone()))
            }
        }
        ledger.rollback().await?;
        let mut reconciliation = Reconciliation::default();
        let mut recorded = Vec::with_capacity(validated.len());
        let mut result = Ok(());
        for (match_id, winning_side) in validated {
            match record_match(&mut *ledger, &match_id, winning_side).await {
                Ok(match_reconciliation) => {
                    reconciliation.absorb(match_reconciliation);
                    recorded.push(match_id);
                }
                Err(e) => {
                    if let Err(rollback_error) = ledger.rollback().await {
                        log::error!("failed to roll back match {match_id}: {rollback_error} ({rollback_error:?})");
                    }
                    result = Err(e);
                    break
                }
            }
        }
        for match_id in recorded {
            self.sync_match(&mut *ledger, match_id).await;
        }
        result.map(|()| reconciliation)
    }

    /// Hands a recorded match to the spreadsheet mirror. Failures are logged and otherwise ignored.
    async fn sync_match<L: Ledger + ?Sized>(&self, ledger: &mut L, match_id: MatchId) {
        let Some(ref mirror) = self.mirror else {
            log::info!("Sheets mirror not configured; skipping sync for match {match_id}.");
            return
        };
        match mirror_job(ledger, match_id.clone()).await {
            Ok(job) => mirror.submit(job),
            Err(e) => log::error!("Sheets sync failed (non-fatal) for match {match_id}: could not read ledger: {e} ({e:?})"),
        }
    }
}

async fn record_match<L: Ledger + ?Sized>(ledger: &mut L, match_id: &MatchId, winning_side: WinningSide) -> Result<Reconciliation, Error> {
    if ledger.lock_match(match_id).await? {
        ledger.rollback().await?;
        return Err(Error::AlreadyRecorded(match_id.clone()))
    }
    Ok(reconcile(ledger, [(match_id.clone(), winning_side)]).await?)
}

/// Collects the match log rows and current player stats for a recorded match.
pub(crate) async fn mirror_job<L: Ledger + ?Sized>(ledger: &mut L, match_id: MatchId) -> sqlx::Result<MirrorJob> {
    let participants = ledger.participants(&match_id).await?;
    let mut players = Vec::with_capacity(participants.len());
    for user_id in participants.iter().map(|participant| participant.user_id).unique() {
        if let Some(record) = ledger.player_sync_record(user_id).await? {
            players.push(record);
        }
    }
    // reads only, nothing to keep
    ledger.commit().await?;
    Ok(MirrorJob {
        match_rows: participants.iter().map(ParticipationRow::sheet_row).collect(),
        match_id, players,
    })
}

#[cfg(test)]
mod tests {
    use {
        crate::{
            ledger::memory::MemoryLedger,
            mirror::tests::{
                FakeSheets,
                mirror,
            },
        },
        super::*,
    };

    fn ledger() -> MemoryLedger {
        let mut ledger = MemoryLedger::default();
        ledger.add_row("M1", 1, "team1");
        ledger.add_row("M1", 2, "team2");
        ledger.add_row("M1", 4, "observer");
        ledger.add_row("M2", 1, "team2");
        ledger.add_row("M2", 3, "team1");
        for user_id in 1..=4 {
            ledger.add_snapshot(user_id, 1, Some(0), Some(0));
        }
        ledger.add_player(1, "Alice", "EUW");
        ledger.add_player(2, "Bob", "NA");
        ledger
    }

    #[tokio::test]
    async fn invalid_side_writes_nothing() {
        let mut ledger = ledger();
        let result = MatchResults::new(None).record(&mut ledger, [(MatchId::from("M1"), 1), (MatchId::from("M2"), 3)]).await;
        assert!(matches!(result, Err(Error::InvalidWinningSide(InvalidSide(3)))));
        assert_eq!(ledger.commits, 0);
        assert!(ledger.committed.matches.iter().all(|row| row.win.is_none()));
    }

    #[tokio::test]
    async fn unknown_match_writes_nothing() {
        let mut ledger = ledger();
        let result = MatchResults::new(None).record(&mut ledger, [(MatchId::from("M1"), 1), (MatchId::from("M9"), 2)]).await;
        assert!(matches!(result, Err(Error::UnknownMatch(MatchId(ref id))) if id == "M9"));
        assert!(result.is_err_and(|e| e.is_user_error()));
        assert!(ledger.committed.matches.iter().all(|row| row.win.is_none()));
    }

    #[tokio::test]
    async fn recorded_match_is_rejected() {
        let mut ledger = ledger();
        let results = MatchResults::new(None);
        results.record(&mut ledger, [(MatchId::from("M1"), 2)]).await.unwrap();
        let again = results.record(&mut ledger, [(MatchId::from("M1"), 2)]).await;
        assert!(matches!(again, Err(Error::AlreadyRecorded(_))));
        assert_eq!(ledger.latest(2).unwrap().wins, Some(1));
    }

    #[tokio::test]
    async fn concurrent_recording_counts_once() {
        let mut ledger = ledger();
        ledger.recorded_elsewhere = Some((MatchId::from("M1"), WinningSide::Team1));
        let result = MatchResults::new(None).record(&mut ledger, [(MatchId::from("M1"), 2)]).await;
        assert!(matches!(result, Err(Error::AlreadyRecorded(MatchId(ref id))) if id == "M1"));
        // only the other recorder's result is applied
        assert_eq!(ledger.row("M1", 1).win, Some(Outcome::Yes));
        assert_eq!(ledger.row("M1", 2).loss, Some(Outcome::Yes));
        assert_eq!((ledger.latest(1).unwrap().wins, ledger.latest(1).unwrap().losses), (Some(1), Some(0)));
        assert_eq!((ledger.latest(2).unwrap().wins, ledger.latest(2).unwrap().losses), (Some(0), Some(1)));
        assert_eq!(ledger.commits, 0);
    }

    #[tokio::test]
    async fn concurrent_recording_keeps_earlier_matches() {
        let mut ledger = ledger();
        ledger.recorded_elsewhere = Some((MatchId::from("M2"), WinningSide::Team1));
        let result = MatchResults::new(None).record(&mut ledger, [(MatchId::from("M1"), 1), (MatchId::from("M2"), 1)]).await;
        assert!(matches!(result, Err(Error::AlreadyRecorded(MatchId(ref id))) if id == "M2"));
        assert_eq!(ledger.row("M1", 1).win, Some(Outcome::Yes));
        // player 1 won M1 here and lost M2 to the other recorder
        assert_eq!((ledger.latest(1).unwrap().wins, ledger.latest(1).unwrap().losses), (Some(1), Some(1)));
        assert_eq!((ledger.latest(3).unwrap().wins, ledger.latest(3).unwrap().losses), (Some(1), Some(0)));
        assert_eq!(ledger.commits, 1);
    }

    #[tokio::test]
    async fn records_without_mirror() {
        let mut ledger = ledger();
        let reconciliation = MatchResults::new(None).record(&mut ledger, [(MatchId::from("M1"), 1), (MatchId::from("M2"), 1)]).await.unwrap();
        assert_eq!(reconciliation.matches_processed, 2);
        assert_eq!(reconciliation.players_updated, 4);
        assert_eq!(ledger.latest(1).unwrap().wins, Some(1));
        assert_eq!(ledger.latest(1).unwrap().losses, Some(1));
    }

    #[tokio::test]
    async fn mirror_job_reflects_committed_result() {
        let mut ledger = ledger();
        reconcile(&mut ledger, [(MatchId::from("M1"), WinningSide::Team1)]).await.unwrap();
        let job = mirror_job(&mut ledger, MatchId::from("M1")).await.unwrap();
        assert_eq!(job.match_rows, vec![
            vec!["M1", "1", "team1", "yes", "no"],
            vec!["M1", "2", "team2", "no", "yes"],
            vec!["M1", "4", "observer", "n/a", "n/a"],
        ]);
        // player 4 has stats but no player profile
        assert_eq!(job.players.iter().map(|player| (&*player.game_name, player.wins, player.losses)).collect_vec(), vec![("Alice", 1, 0), ("Bob", 0, 1)]);
    }

    #[tokio::test]
    async fn recorded_matches_reach_the_sheet() {
        let backend = FakeSheets::with_players(&["1", "2", "3"]);
        let (queue, task) = MirrorQueue::spawn(mirror(backend.clone()));
        let mut ledger = ledger();
        MatchResults::new(Some(queue)).record(&mut ledger, [(MatchId::from("M1"), 2)]).await.unwrap();
        task.await.unwrap();
        let calls = backend.calls.lock().unwrap();
        assert_eq!(calls.appends.len(), 1);
        assert_eq!(calls.appends[0].1.len(), 3);
        let ranges = calls.batch_updates[0].iter().map(|(range, _)| &**range).collect_vec();
        assert_eq!(ranges, vec!["'Players'!B2:L2", "'Players'!B3:L3"]);
    }
}
