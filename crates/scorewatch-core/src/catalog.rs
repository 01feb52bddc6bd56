//! Normalized entities referenced by a record set (sports, leagues,
//! participants), in first-seen order. Downstream persistence upserts these
//! before the matches that reference them.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::types::Record;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LeagueRef {
    pub sport: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityCatalog {
    pub sports: Vec<String>,
    pub leagues: Vec<LeagueRef>,
    pub participants: Vec<String>,
}

impl EntityCatalog {
    pub fn from_records<'a, I>(records: I) -> Self
    where
        I: IntoIterator<Item = &'a Record>,
    {
        let mut catalog = Self::default();
        for record in records {
            let sport = non_empty(record.str_field("sport"));
            let league = non_empty(record.str_field("league"));
            if let (Some(sport), Some(league)) = (sport, league) {
                push_unique(
                    &mut catalog.leagues,
                    LeagueRef {
                        sport: sport.to_string(),
                        name: league.to_string(),
                    },
                );
            }
            if let Some(sport) = sport {
                push_unique(&mut catalog.sports, sport.to_string());
            }
            for field in ["home_participant", "away_participant"] {
                if let Some(name) = non_empty(record.str_field(field)) {
                    push_unique(&mut catalog.participants, name.to_string());
                }
            }
        }
        catalog
    }

    pub fn is_empty(&self) -> bool {
        self.sports.is_empty() && self.leagues.is_empty() && self.participants.is_empty()
    }

    /// Entities present here but not in `known`.
    pub fn difference(&self, known: &Self) -> Self {
        let sports: HashSet<&String> = known.sports.iter().collect();
        let leagues: HashSet<&LeagueRef> = known.leagues.iter().collect();
        let participants: HashSet<&String> = known.participants.iter().collect();
        Self {
            sports: self
                .sports
                .iter()
                .filter(|s| !sports.contains(s))
                .cloned()
                .collect(),
            leagues: self
                .leagues
                .iter()
                .filter(|l| !leagues.contains(l))
                .cloned()
                .collect(),
            participants: self
                .participants
                .iter()
                .filter(|p| !participants.contains(p))
                .cloned()
                .collect(),
        }
    }

    pub fn absorb(&mut self, other: Self) {
        for sport in other.sports {
            push_unique(&mut self.sports, sport);
        }
        for league in other.leagues {
            push_unique(&mut self.leagues, league);
        }
        for participant in other.participants {
            push_unique(&mut self.participants, participant);
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|s| !s.is_empty())
}

fn push_unique<T: PartialEq>(items: &mut Vec<T>, item: T) {
    if !items.contains(&item) {
        items.push(item);
    }
}
