//! Pairwise contact matching over staged pings.

use std::collections::BTreeMap;

use chrono::{NaiveDate, Timelike};
use grafo_core::{ContactRecord, Ping};
use rayon::prelude::*;

use crate::error::EngineError;
use crate::geo::haversine_m;
use crate::request::ContactWindowRequest;

pub(super) struct MatchOutcome {
    pub contacts: Vec<ContactRecord>,
    pub rows_read: u64,
    pub comparisons: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct GroupKey {
    date: NaiveDate,
    hour: u32,
    id1: String,
    id2: String,
}

#[derive(Debug, Default)]
struct GroupAcc {
    lat: f64,
    lon: f64,
    id1_accuracy: f64,
    id2_accuracy: f64,
    contacts: u64,
}

impl GroupAcc {
    fn add(&mut self, first: &Ping, second: &Ping) {
        self.lat += first.lat;
        self.lon += first.lon;
        self.id1_accuracy += first.accuracy;
        self.id2_accuracy += second.accuracy;
        self.contacts += 1;
    }
}

/// Pings grouped by the minute they fall in.
fn minute_buckets<'a>(pings: &[&'a Ping]) -> BTreeMap<i64, Vec<&'a Ping>> {
    let mut buckets: BTreeMap<i64, Vec<&Ping>> = BTreeMap::new();
    for ping in pings {
        buckets
            .entry(ping.timestamp.timestamp().div_euclid(60))
            .or_default()
            .push(ping);
    }
    buckets
}

/// Pairs the kernel must look at: every pair inside a bucket plus every pair
/// between a bucket and the `reach` buckets after it.
fn candidate_comparisons(buckets: &BTreeMap<i64, Vec<&Ping>>, reach: i64) -> u64 {
    buckets
        .iter()
        .map(|(minute, pings)| {
            let n = pings.len() as u64;
            let ahead: u64 = buckets
                .range(minute + 1..=minute + reach)
                .map(|(_, later)| later.len() as u64)
                .sum();
            n * n.saturating_sub(1) / 2 + n * ahead
        })
        .sum()
}

fn is_contact(a: &Ping, b: &Ping, request: &ContactWindowRequest) -> bool {
    a.identifier != b.identifier
        && (a.timestamp - b.timestamp).num_minutes().abs() <= request.max_minutes_apart
        && haversine_m(a.lat, a.lon, b.lat, b.lon) <= request.max_distance_m
}

fn ordered<'a>(a: &'a Ping, b: &'a Ping) -> (&'a Ping, &'a Ping) {
    if a.identifier < b.identifier {
        (a, b)
    } else {
        (b, a)
    }
}

/// Match every staged ping of the request's window and aggregate the pairs
/// per `(date, hour, id1, id2)`.
pub(super) fn match_window(
    staged: &[Ping],
    request: &ContactWindowRequest,
    budget: Option<u64>,
) -> Result<MatchOutcome, EngineError> {
    let selected: Vec<&Ping> = staged
        .iter()
        .filter(|p| {
            p.region_code == request.region_code
                && p.timestamp >= request.start
                && p.timestamp < request.end
                && p.accuracy <= request.precision
        })
        .collect();

    let buckets = minute_buckets(&selected);
    // Whole-minute truncation lets a matching pair straddle one extra bucket.
    let reach = request.max_minutes_apart + 1;
    let comparisons = candidate_comparisons(&buckets, reach);
    if let Some(budget) = budget {
        if comparisons > budget {
            return Err(EngineError::ResourcesExceeded {
                used: comparisons,
                budget,
            });
        }
    }

    let minutes: Vec<i64> = buckets.keys().copied().collect();
    let matched: Vec<(GroupKey, &Ping, &Ping)> = minutes
        .par_iter()
        .flat_map_iter(|minute| {
            let here = &buckets[minute];
            let mut pairs = Vec::new();
            for (i, a) in here.iter().enumerate() {
                for b in &here[i + 1..] {
                    pairs.push((*a, *b));
                }
                for (_, later) in buckets.range(minute + 1..=minute + reach) {
                    for b in later {
                        pairs.push((*a, *b));
                    }
                }
            }
            pairs
                .into_iter()
                .filter(|(a, b)| is_contact(a, b, request))
                .map(|(a, b)| {
                    let (first, second) = ordered(a, b);
                    let key = GroupKey {
                        date: first.timestamp.date_naive(),
                        hour: first.timestamp.hour(),
                        id1: first.identifier.clone(),
                        id2: second.identifier.clone(),
                    };
                    (key, first, second)
                })
        })
        .collect();

    let mut groups: BTreeMap<GroupKey, GroupAcc> = BTreeMap::new();
    for (key, first, second) in matched {
        groups.entry(key).or_default().add(first, second);
    }

    let contacts = groups
        .into_iter()
        .map(|(key, acc)| {
            let n = acc.contacts as f64;
            ContactRecord {
                id1: key.id1,
                id2: key.id2,
                date: key.date,
                hour: key.hour,
                region_code: request.region_code.clone(),
                lat: acc.lat / n,
                lon: acc.lon / n,
                id1_accuracy: acc.id1_accuracy / n,
                id2_accuracy: acc.id2_accuracy / n,
                contacts: acc.contacts,
            }
        })
        .collect();

    Ok(MatchOutcome {
        contacts,
        rows_read: selected.len() as u64,
        comparisons,
    })
}
