//! The relational store holding match participation rows and per-player stat history.

use {
    std::num::NonZeroU64,
    derive_more::{
        Display,
        From,
        FromStr,
    },
    crate::prelude::*,
};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Display, From, FromStr)]
pub(crate) struct MatchId(pub(crate) String);

impl From<&str> for MatchId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

/// The team declared as having won a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WinningSide {
    Team1,
    Team2,
}

#[derive(Debug, thiserror::Error)]
#[error("winning team must be either 1 or 2, got {0}")]
pub(crate) struct InvalidSide(pub(crate) i64);

impl TryFrom<i64> for WinningSide {
    type Error = InvalidSide;

    fn try_from(number: i64) -> Result<Self, InvalidSide> {
        match number {
            1 => Ok(Self::Team1),
            2 => Ok(Self::Team2),
            _ => Err(InvalidSide(number)),
        }
    }
}

impl WinningSide {
    pub(crate) fn number(&self) -> u8 {
        match self {
            Self::Team1 => 1,
            Self::Team2 => 2,
        }
    }

    pub(crate) fn opponent(&self) -> Self {
        match self {
            Self::Team1 => Self::Team2,
            Self::Team2 => Self::Team1,
        }
    }

    /// The value of the `side` column for participants on this team.
    pub(crate) fn label(&self) -> &'static str {
        match self {
            Self::Team1 => "team1",
            Self::Team2 => "team2",
        }
    }
}

/// A value of the `win` or `loss` column once a match has been recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    Yes,
    No,
    NotApplicable,
}

#[derive(Debug, thiserror::Error)]
#[error("unexpected win/loss value in ledger: {0:?}")]
pub(crate) struct UnknownOutcome(String);

impl Outcome {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            Self::Yes => "yes",
            Self::No => "no",
            Self::NotApplicable => "n/a",
        }
    }

    fn parse(value: Option<String>) -> Result<Option<Self>, UnknownOutcome> {
        match value.as_deref() {
            None => Ok(None),
            Some("yes") => Ok(Some(Self::Yes)),
            Some("no") => Ok(Some(Self::No)),
            Some("n/a") => Ok(Some(Self::NotApplicable)),
            Some(_) => Err(UnknownOutcome(value.unwrap_or_default())),
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One player's participation in one match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ParticipationRow {
    pub(crate) match_id: MatchId,
    pub(crate) user_id: UserId,
    pub(crate) side: String,
    pub(crate) win: Option<Outcome>,
    pub(crate) loss: Option<Outcome>,
}

impl ParticipationRow {
    /// Columns of the spreadsheet's match log: match id, user id, side, win, loss.
    pub(crate) fn sheet_row(&self) -> Vec<String> {
        vec![
            self.match_id.to_string(),
            self.user_id.to_string(),
            self.side.clone(),
            self.win.map(|win| win.to_string()).unwrap_or_default(),
            self.loss.map(|loss| loss.to_string()).unwrap_or_default(),
        ]
    }
}

/// A player's dated stat record. Only the latest one per player is ever mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct StatSnapshot {
    pub(crate) user_id: UserId,
    pub(crate) as_of: NaiveDate,
    pub(crate) wins: Option<i32>,
    pub(crate) losses: Option<i32>,
}

/// A player's display name joined with their latest stats, as mirrored to the spreadsheet.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PlayerSyncRecord {
    pub(crate) player_id: UserId,
    pub(crate) game_name: String,
    pub(crate) tag_id: String,
    pub(crate) tier: String,
    pub(crate) rank: String,
    pub(crate) role: String,
    pub(crate) wins: i32,
    pub(crate) losses: i32,
    pub(crate) manual_tier: Option<String>,
    pub(crate) toxicity_points: i32,
    pub(crate) mvp_count: i32,
}

impl PlayerSyncRecord {
    /// Applies the display defaults used for players with sparse stat records.
    pub(crate) fn new(
        player_id: UserId,
        game_name: Option<String>,
        tag_id: Option<String>,
        tier: Option<String>,
        rank: Option<String>,
        role: Option<String>,
        wins: Option<i32>,
        losses: Option<i32>,
        manual_tier: Option<String>,
        toxicity_points: Option<i32>,
        mvp_count: Option<i32>,
    ) -> Self {
        Self {
            player_id,
            game_name: game_name.unwrap_or_default(),
            tag_id: tag_id.unwrap_or_default(),
            tier: tier.filter(|tier| !tier.is_empty()).unwrap_or_else(|| format!("default")),
            rank: rank.filter(|rank| !rank.is_empty()).unwrap_or_else(|| format!("V")),
            role: role.unwrap_or_default(),
            wins: wins.unwrap_or_default(),
            losses: losses.unwrap_or_default(),
            manual_tier,
            toxicity_points: toxicity_points.unwrap_or_default(),
            mvp_count: mvp_count.unwrap_or_default(),
        }
    }
}

/// Access to the match and stat tables.
///
/// Writes are staged until [`Ledger::commit`] and discarded if the ledger is dropped first.
#[async_trait]
pub(crate) trait Ledger: Send {
    /// Sets `win` and `loss` on every row of the match whose side is `side`. Returns the number of rows updated.
    async fn mark_side(&mut self, match_id: &MatchId, side: &str, win: Outcome, loss: Outcome) -> sqlx::Result<u64>;
    /// Sets `win` and `loss` to n/a on every row of the match that is still unset. Returns the number of rows updated.
    async fn mark_unresolved(&mut self, match_id: &MatchId) -> sqlx::Result<u64>;
    async fn participants(&mut self, match_id: &MatchId) -> sqlx::Result<Vec<ParticipationRow>>;
    async fn latest_snapshot(&mut self, user_id: UserId) -> sqlx::Result<Option<StatSnapshot>>;
    /// Overwrites the win/loss counters of the snapshot identified by `snapshot.user_id` and `snapshot.as_of`.
    async fn save_record(&mut self, snapshot: &StatSnapshot) -> sqlx::Result<()>;
    async fn commit(&mut self) -> sqlx::Result<()>;
    /// Discards staged writes and releases any locks taken since the last commit.
    async fn rollback(&mut self) -> sqlx::Result<()>;

    /// Locks the match's rows until the next commit or rollback, then reports whether any of them already has a result.
    ///
    /// A concurrent recorder of the same match blocks here until the first one commits, then sees its result.
    async fn lock_match(&mut self, match_id: &MatchId) -> sqlx::Result<bool>;
    async fn count_rows(&mut self, match_id: &MatchId) -> sqlx::Result<u64>;
    /// Whether any row of the match already has a win or loss value.
    async fn is_resolved(&mut self, match_id: &MatchId) -> sqlx::Result<bool>;
    /// Matches with rows still awaiting a result, most recently played first.
    async fn pending_matches(&mut self, limit: i64) -> sqlx::Result<Vec<MatchId>>;
    async fn player_sync_record(&mut self, user_id: UserId) -> sqlx::Result<Option<PlayerSyncRecord>>;
}

pub(crate) fn user_id_from_db(id: i64) -> sqlx::Result<UserId> {
    u64::try_from(id).ok()
        .and_then(NonZeroU64::new)
        .map(UserId::from)
        .ok_or_else(|| sqlx::Error::Decode(format!("invalid Discord user ID in ledger: {id}").into()))
}

pub(crate) fn user_id_to_db(id: UserId) -> i64 {
    id.get() as i64
}

/// A [`Ledger`] backed by Postgres, running each unit of work in its own transaction.
pub(crate) struct PgLedger {
    pool: PgPool,
    transaction: Option<Transaction<'static, Postgres>>,
}

impl PgLedger {
    pub(crate) fn new(pool: PgPool) -> Self {
        Self { pool, transaction: None }
    }

    async fn transaction(&mut self) -> sqlx::Result<&mut Transaction<'static, Postgres>> {
        let transaction = match self.transaction.take() {
            Some(transaction) => transaction,
            None => self.pool.begin().await?,
        };
        Ok(self.transaction.insert(transaction))
    }
}

#[async_trait]
impl Ledger for PgLedger {
    async fn mark_side(&mut self, match_id: &MatchId, side: &str, win: Outcome, loss: Outcome) -> sqlx::Result<u64> {
        let transaction = self.transaction().await?;
        Ok(sqlx::query("UPDATE matches SET win = $1, loss = $2 WHERE match_id = $3 AND side = $4")
            .bind(win.as_str())
            .bind(loss.as_str())
            .bind(&match_id.0)
            .bind(side)
            .execute(&mut **transaction).await?
            .rows_affected())
    }

    async fn mark_unresolved(&mut self, match_id: &MatchId) -> sqlx::Result<u64> {
        let transaction = self.transaction().await?;
        Ok(sqlx::query("UPDATE matches SET win = $1, loss = $1 WHERE match_id = $2 AND win IS NULL AND loss IS NULL")
            .bind(Outcome::NotApplicable.as_str())
            .bind(&match_id.0)
            .execute(&mut **transaction).await?
            .rows_affected())
    }

    async fn participants(&mut self, match_id: &MatchId) -> sqlx::Result<Vec<ParticipationRow>> {
        let transaction = self.transaction().await?;
        let rows = sqlx::query("SELECT user_id, side, win, loss FROM matches WHERE match_id = $1 ORDER BY user_id")
            .bind(&match_id.0)
            .fetch_all(&mut **transaction).await?;
        rows.into_iter().map(|row| -> sqlx::Result<_> {
            Ok(ParticipationRow {
                match_id: match_id.clone(),
                user_id: user_id_from_db(row.try_get("user_id")?)?,
                side: row.try_get::<Option<String>, _>("side")?.unwrap_or_default(),
                win: Outcome::parse(row.try_get("win")?).map_err(|e| sqlx::Error::Decode(Box::new(e)))?,
                loss: Outcome::parse(row.try_get("loss")?).map_err(|e| sqlx::Error::Decode(Box::new(e)))?,
            })
        }).collect()
    }

    async fn latest_snapshot(&mut self, user_id: UserId) -> sqlx::Result<Option<StatSnapshot>> {
        let transaction = self.transaction().await?;
        let row = sqlx::query("SELECT game_date, wins, losses FROM game WHERE user_id = $1 ORDER BY game_date DESC LIMIT 1")
            .bind(user_id_to_db(user_id))
            .fetch_optional(&mut **transaction).await?;
        row.map(|row| -> sqlx::Result<_> {
            Ok(StatSnapshot {
                user_id,
                as_of: row.try_get("game_date")?,
                wins: row.try_get("wins")?,
                losses: row.try_get("losses")?,
            })
        }).transpose()
    }

    async fn save_record(&mut self, snapshot: &StatSnapshot) -> sqlx::Result<()> {
        let transaction = self.transaction().await?;
        sqlx::query("UPDATE game SET wins = $1, losses = $2 WHERE user_id = $3 AND game_date = $4")
            .bind(snapshot.wins)
            .bind(snapshot.losses)
            .bind(user_id_to_db(snapshot.user_id))
            .bind(snapshot.as_of)
            .execute(&mut **transaction).await?;
        Ok(())
    }

    async fn commit(&mut self) -> sqlx::Result<()> {
        if let Some(transaction) = self.transaction.take() {
            transaction.commit().await?;
        }
        Ok(())
    }

    async fn rollback(&mut self) -> sqlx::Result<()> {
        if let Some(transaction) = self.transaction.take() {
            transaction.rollback().await?;
        }
        Ok(())
    }

    async fn lock_match(&mut self, match_id: &MatchId) -> sqlx::Result<bool> {
        let transaction = self.transaction().await?;
        let resolved = sqlx::query_scalar::<_, bool>("SELECT win IS NOT NULL OR loss IS NOT NULL FROM matches WHERE match_id = $1 FOR UPDATE")
            .bind(&match_id.0)
            .fetch_all(&mut **transaction).await?;
        Ok(resolved.into_iter().any(|resolved| resolved))
    }

    async fn count_rows(&mut self, match_id: &MatchId) -> sqlx::Result<u64> {
        let transaction = self.transaction().await?;
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM matches WHERE match_id = $1")
            .bind(&match_id.0)
            .fetch_one(&mut **transaction).await?;
        Ok(count.try_into().unwrap_or_default())
    }

    async fn is_resolved(&mut self, match_id: &MatchId) -> sqlx::Result<bool> {
        let transaction = self.transaction().await?;
        sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM matches WHERE match_id = $1 AND (win IS NOT NULL OR loss IS NOT NULL))")
            .bind(&match_id.0)
            .fetch_one(&mut **transaction).await
    }

    async fn pending_matches(&mut self, limit: i64) -> sqlx::Result<Vec<MatchId>> {
        let transaction = self.transaction().await?;
        let ids = sqlx::query_scalar::<_, String>("
            SELECT match_id FROM matches
            WHERE win IS NULL AND loss IS NULL
            GROUP BY match_id
            ORDER BY MAX(date_played) DESC, match_id ASC
            LIMIT $1
        ")
            .bind(limit)
            .fetch_all(&mut **transaction).await?;
        Ok(ids.into_iter().map(MatchId).collect())
    }

    async fn player_sync_record(&mut self, user_id: UserId) -> sqlx::Result<Option<PlayerSyncRecord>> {
        let transaction = self.transaction().await?;
        let row = sqlx::query("
            SELECT p.game_name, p.tag_id, g.tier, g.rank, g.role, g.wins, g.losses, g.manual_tier, g.toxicity_points, g.mvp_count
            FROM player p
            JOIN game g ON p.user_id = g.user_id
            WHERE p.user_id = $1
            ORDER BY g.game_date DESC
            LIMIT 1
        ")
            .bind(user_id_to_db(user_id))
            .fetch_optional(&mut **transaction).await?;
        row.map(|row| -> sqlx::Result<_> {
            Ok(PlayerSyncRecord::new(
                user_id,
                row.try_get("game_name")?,
                row.try_get("tag_id")?,
                row.try_get("tier")?,
                row.try_get("rank")?,
                row.try_get("role")?,
                row.try_get("wins")?,
                row.try_get("losses")?,
                row.try_get("manual_tier")?,
                row.try_get("toxicity_points")?,
                row.try_get("mvp_count")?,
            ))
        }).transpose()
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn winning_side_from_number() {
        assert_eq!(WinningSide::try_from(1).ok(), Some(WinningSide::Team1));
        assert_eq!(WinningSide::try_from(2).ok(), Some(WinningSide::Team2));
        assert!(WinningSide::try_from(0).is_err());
        assert!(WinningSide::try_from(3).is_err());
    }

    #[test]
    fn losing_side_is_the_other_team() {
        assert_eq!(WinningSide::Team1.opponent().label(), "team2");
        assert_eq!(WinningSide::Team2.opponent().label(), "team1");
        assert_eq!(WinningSide::Team2.number(), 2);
    }

    #[test]
    fn outcome_column_values() {
        assert_eq!(Outcome::parse(Some(format!("n/a"))).ok(), Some(Some(Outcome::NotApplicable)));
        assert_eq!(Outcome::parse(None).ok(), Some(None));
        assert!(Outcome::parse(Some(format!("maybe"))).is_err());
    }

    #[test]
    fn sync_record_defaults() {
        let record = PlayerSyncRecord::new(UserId::new(7), Some(format!("Link")), None, None, Some(String::new()), None, None, Some(2), None, None, None);
        assert_eq!(record.tier, "default");
        assert_eq!(record.rank, "V");
        assert_eq!(record.role, "");
        assert_eq!(record.wins, 0);
        assert_eq!(record.losses, 2);
    }

    #[tokio::test]
    async fn pending_matches_newest_first() {
        let mut ledger = memory::MemoryLedger::default();
        ledger.add_row_played("M1", 1, "team1", 3);
        ledger.add_row_played("M1", 2, "team2", 3);
        ledger.add_row_played("M1", 3, "observer", 3);
        ledger.add_row_played("M2", 1, "team1", 5);
        ledger.add_row_played("M3", 2, "team1", 7);
        ledger.add_row_played("M4", 4, "team2", 5);
        ledger.committed.matches.iter_mut().filter(|row| row.match_id.0 == "M3").for_each(|row| {
            row.win = Some(Outcome::Yes);
            row.loss = Some(Outcome::No);
        });
        assert_eq!(ledger.pending_matches(10).await.unwrap(), vec![MatchId::from("M2"), MatchId::from("M4"), MatchId::from("M1")]);
        assert_eq!(ledger.pending_matches(2).await.unwrap(), vec![MatchId::from("M2"), MatchId::from("M4")]);
        assert!(ledger.pending_matches(0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn rollback_discards_staged_writes() {
        let mut ledger = memory::MemoryLedger::default();
        ledger.add_row("M1", 1, "team1");
        ledger.mark_side(&MatchId::from("M1"), "team1", Outcome::Yes, Outcome::No).await.unwrap();
        ledger.rollback().await.unwrap();
        assert!(!ledger.is_resolved(&MatchId::from("M1")).await.unwrap());
        assert_eq!(ledger.commits, 0);
    }

    #[test]
    fn unset_outcomes_render_as_empty_cells() {
        let row = ParticipationRow {
            match_id: MatchId::from("M1"),
            user_id: UserId::new(42),
            side: format!("observer"),
            win: None,
            loss: Some(Outcome::NotApplicable),
        };
        assert_eq!(row.sheet_row(), vec!["M1", "42", "observer", "", "n/a"]);
    }
}
