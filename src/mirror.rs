//! Best-effort replication of recorded matches and player stats to a spreadsheet.
//!
//! The ledger stays the system of record. Nothing in here reports failure to its callers:
//! sync jobs run on a background task and errors end up in the log.

use {
    tokio::task::JoinHandle,
    crate::{
        prelude::*,
        sheets::{
            self,
            SheetsBackend,
        },
    },
};

pub(crate) const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

/// Win rate in percent, rounded to two decimals. Players without games sit at 50%.
pub(crate) fn compute_win_rate(wins: i32, losses: i32) -> f64 {
    let games = i64::from(wins) + i64::from(losses);
    if games <= 0 {
        return 50.0
    }
    (f64::from(wins) / games as f64 * 100.0 * 100.0).round() / 100.0
}

/// Spreadsheet row numbers of known players, keyed by the trimmed value of the player ID column.
#[derive(Debug)]
pub(crate) struct RowIndex {
    rows: HashMap<String, usize>,
    loaded: Instant,
}

impl RowIndex {
    /// Builds the index from the values of the ID column. Row 1 is the header.
    fn new(column: Vec<Vec<String>>) -> Self {
        Self {
            rows: column.into_iter()
                .enumerate()
                .skip(1)
                .filter_map(|(idx, row)| {
                    let id = row.into_iter().next()?.trim().to_owned();
                    (!id.is_empty()).then_some((id, idx + 1))
                })
                .collect(),
            loaded: Instant::now(),
        }
    }

    pub(crate) fn get(&self, player_id: UserId) -> Option<usize> {
        self.rows.get(&player_id.to_string()).copied()
    }
}

pub(crate) struct SheetMirror<B: SheetsBackend> {
    backend: B,
    players_tab: String,
    matches_tab: String,
    cache_ttl: Duration,
    index: Option<RowIndex>,
}

impl<B: SheetsBackend> SheetMirror<B> {
    pub(crate) fn new(backend: B, players_tab: String, matches_tab: String, cache_ttl: Duration) -> Self {
        Self { backend, players_tab, matches_tab, cache_ttl, index: None }
    }

    /// Looks up a player's row, rebuilding the whole index once it is older than the cache TTL.
    pub(crate) async fn player_row(&mut self, player_id: UserId) -> Result<Option<usize>, sheets::Error> {
        let index = match self.index.take() {
            Some(index) if index.loaded.elapsed() <= self.cache_ttl => index,
            _ => {
                let column = self.backend.values(&format!("'{}'!A:A", self.players_tab)).await?;
                let index = RowIndex::new(column);
                log::debug!("loaded spreadsheet row index with {} players", index.rows.len());
                index
            }
        };
        Ok(self.index.insert(index).get(player_id))
    }

    /// Appends rows to the match log. Does nothing for an empty list.
    pub(crate) async fn append_match_rows(&mut self, rows: Vec<Vec<String>>) -> Result<(), sheets::Error> {
        if rows.is_empty() {
            return Ok(())
        }
        self.backend.append_rows(&format!("'{}'!A:E", self.matches_tab), rows).await
    }

    /// Writes columns B through L of each player's row in one request.
    /// Players without a row on the sheet are skipped; this never inserts rows.
    pub(crate) async fn upsert_players_batch(&mut self, players: &[PlayerSyncRecord]) -> Result<usize, sheets::Error> {
        let mut updates = Vec::with_capacity(players.len());
        for player in players {
            let Some(row) = self.player_row(player.player_id).await? else {
                log::debug!("player {} has no row on the spreadsheet, skipping", player.player_id);
                continue
            };
            updates.push((format!("'{}'!B{row}:L{row}", self.players_tab), vec![vec![
                player.game_name.clone(),
                player.tag_id.clone(),
                player.tier.clone(),
                player.rank.clone(),
                player.role.clone(),
                player.wins.to_string(),
                player.losses.to_string(),
                player.manual_tier.clone().unwrap_or_default(),
                compute_win_rate(player.wins, player.losses).to_string(),
                player.toxicity_points.to_string(),
                player.mvp_count.to_string(),
            ]]));
        }
        let written = updates.len();
        self.backend.batch_update(updates).await?;
        Ok(written)
    }

    /// Runs both halves of a job independently, logging instead of returning failures.
    pub(crate) async fn sync(&mut self, MirrorJob { match_id, match_rows, players }: MirrorJob) {
        if let Err(e) = self.append_match_rows(match_rows).await {
            log::error!("Sheets sync failed (non-fatal) for match {match_id}: could not append match rows: {e} ({e:?})");
        }
        match self.upsert_players_batch(&players).await {
            Ok(written) => log::info!("Synced match {match_id} to Sheets: {written} of {} players.", players.len()),
            Err(e) => log::error!("Sheets sync failed (non-fatal) for match {match_id}: could not update players: {e} ({e:?})"),
        }
    }
}

/// Everything needed to mirror one recorded match.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct MirrorJob {
    pub(crate) match_id: MatchId,
    pub(crate) match_rows: Vec<Vec<String>>,
    pub(crate) players: Vec<PlayerSyncRecord>,
}

/// Sending half of the queue feeding the mirror's background task.
#[derive(Debug, Clone)]
pub(crate) struct MirrorQueue {
    tx: mpsc::UnboundedSender<MirrorJob>,
}

impl MirrorQueue {
    /// Moves the mirror onto a background task. The task ends once every queue handle is dropped and the backlog is done.
    pub(crate) fn spawn<B: SheetsBackend + 'static>(mut mirror: SheetMirror<B>) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<MirrorJob>();
        let task = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                mirror.sync(job).await;
            }
        });
        (Self { tx }, task)
    }

    pub(crate) fn submit(&self, job: MirrorJob) {
        let match_id = job.match_id.clone();
        if self.tx.send(job).is_err() {
            log::error!("Sheets sync failed (non-fatal) for match {match_id}: mirror task is not running");
        }
    }
}
