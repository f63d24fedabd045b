//! Host list resolution and ordering
//!
//! Turns symbolic host references into a concrete, deterministically ordered
//! deploy plan: aliases expand to fnmatch-style globs, canaries go first (one
//! per pool), and the remainder is interleaved so hosts from the same pool
//! are spread as far apart as possible.

use std::cmp::Reverse;
use std::collections::{HashMap, VecDeque};

use thiserror::Error;

use rollout_inventory::Host;

/// Reference resolution failures; all fatal before the deploy starts.
#[derive(Error, Debug, Clone)]
pub enum HostlistError {
    #[error("unresolvable alias: {glob:?} matched no hosts")]
    UnresolvableAlias { glob: String },

    #[error("no host or alias found for {host_ref:?}")]
    UnresolvableHostRef { host_ref: String },

    #[error("{0}")]
    HostSelection(String),
}

/// Expand one alias's globs against the fleet.
///
/// Every glob must match at least one host name; an alias that is never
/// referenced is never expanded, so stale aliases in the profile are
/// harmless until someone actually uses them.
fn resolve_alias(all_hosts: &[Host], globs: &[String]) -> Result<Vec<Host>, HostlistError> {
    let mut hosts = Vec::new();

    for glob in globs {
        let pattern =
            glob::Pattern::new(glob).map_err(|_| HostlistError::UnresolvableAlias {
                glob: glob.clone(),
            })?;
        let globbed: Vec<Host> = all_hosts
            .iter()
            .filter(|host| pattern.matches(&host.name))
            .cloned()
            .collect();
        if globbed.is_empty() {
            return Err(HostlistError::UnresolvableAlias { glob: glob.clone() });
        }
        hosts.extend(globbed);
    }
    Ok(hosts)
}

/// Resolve symbolic references (alias keys or exact host names) against the
/// fleet, in reference order.
pub fn resolve_hostlist(
    host_refs: &[String],
    all_hosts: &[Host],
    aliases: &HashMap<String, Vec<String>>,
) -> Result<Vec<Host>, HostlistError> {
    let mut resolved = Vec::new();

    for host_ref in host_refs {
        if let Some(globs) = aliases.get(host_ref) {
            resolved.extend(resolve_alias(all_hosts, globs)?);
        } else {
            let matching: Vec<Host> = all_hosts
                .iter()
                .filter(|host| &host.name == host_ref)
                .cloned()
                .collect();
            if matching.is_empty() {
                return Err(HostlistError::UnresolvableHostRef {
                    host_ref: host_ref.clone(),
                });
            }
            resolved.extend(matching);
        }
    }

    Ok(resolved)
}

/// Cut the list down to a window: drop everything from `stop_before` on,
/// then everything before `start_at`. Both anchors must name a host that is
/// actually in the list.
pub fn restrict_hostlist(
    hosts: Vec<Host>,
    start_at: Option<&str>,
    stop_before: Option<&str>,
) -> Result<Vec<Host>, HostlistError> {
    if let Some(start) = start_at {
        if !hosts.iter().any(|host| host.name == start) {
            return Err(HostlistError::HostSelection(format!(
                "--startat: {start:?} not in host list"
            )));
        }
    }
    if let Some(stop) = stop_before {
        if !hosts.iter().any(|host| host.name == stop) {
            return Err(HostlistError::HostSelection(format!(
                "--stopbefore: {stop:?} not in host list"
            )));
        }
    }

    if start_at.is_none() && stop_before.is_none() {
        return Ok(hosts);
    }

    let mut filtered: Vec<Host> = hosts;
    if let Some(stop) = stop_before {
        filtered = filtered
            .into_iter()
            .take_while(|host| host.name != stop)
            .collect();
    }
    if let Some(start) = start_at {
        filtered = filtered
            .into_iter()
            .skip_while(|host| host.name != start)
            .collect();
    }
    Ok(filtered)
}

/// Group hosts by pool, largest pool first; equal-size pools order by name so
/// the result is stable across runs.
fn pools_by_size(hosts: &[Host]) -> Vec<(String, Vec<Host>)> {
    let mut groups: Vec<(String, Vec<Host>)> = Vec::new();
    for host in hosts {
        match groups.iter_mut().find(|(pool, _)| pool == &host.pool) {
            Some((_, members)) => members.push(host.clone()),
            None => groups.push((host.pool.clone(), vec![host.clone()])),
        }
    }
    groups.sort_by(|(a_pool, a), (b_pool, b)| b.len().cmp(&a.len()).then(a_pool.cmp(b_pool)));
    groups
}

/// Pick one canary per pool: the host with the smallest id. The biggest pool
/// comes first so the most-trafficked host class is exercised earliest.
pub fn select_canaries(hosts: &[Host]) -> Vec<Host> {
    pools_by_size(hosts)
        .into_iter()
        .filter_map(|(_, members)| members.into_iter().min_by(|a, b| a.id.cmp(&b.id)))
        .collect()
}

/// Interleave hosts so same-pool neighbours only occur when no other pool
/// has hosts left to separate them: pools take turns, each slot going to the
/// largest remaining pool that did not fill the previous slot.
///
/// The merge runs over the reversed member lists and is flipped before
/// returning, so within-pool input order is preserved and any unavoidable
/// same-pool run sits at the head of the returned list, where the caller's
/// final reversal parks it at the tail of the deploy order.
pub fn interleaved(hosts: &[Host]) -> Vec<Host> {
    let mut groups: Vec<(String, VecDeque<Host>)> = pools_by_size(hosts)
        .into_iter()
        .map(|(pool, members)| (pool, members.into_iter().rev().collect()))
        .collect();

    let mut merged: Vec<Host> = Vec::with_capacity(hosts.len());
    let mut last_pool: Option<String> = None;

    while merged.len() < hosts.len() {
        let next = groups
            .iter()
            .enumerate()
            .filter(|(_, (pool, members))| {
                !members.is_empty() && last_pool.as_deref() != Some(pool.as_str())
            })
            .max_by_key(|(index, (_, members))| (members.len(), Reverse(*index)))
            .map(|(index, _)| index)
            .or_else(|| groups.iter().position(|(_, members)| !members.is_empty()));

        let Some(index) = next else {
            break;
        };
        let (pool, members) = &mut groups[index];
        let Some(host) = members.pop_front() else {
            break;
        };
        last_pool = Some(pool.clone());
        merged.push(host);
    }

    merged.reverse();
    merged
}

/// The full pipeline: resolve, restrict, pick canaries, interleave the rest.
///
/// The remainder is sorted by descending id before interleaving (for
/// repeatability across deploys) and reversed afterwards, giving small pools
/// room at the tail after their single canary at the head.
pub fn plan_host_order(
    host_refs: &[String],
    all_hosts: &[Host],
    aliases: &HashMap<String, Vec<String>>,
    start_at: Option<&str>,
    stop_before: Option<&str>,
) -> Result<Vec<Host>, HostlistError> {
    let resolved = resolve_hostlist(host_refs, all_hosts, aliases)?;
    let restricted = restrict_hostlist(resolved, start_at, stop_before)?;

    let canaries = select_canaries(&restricted);
    let mut remainder: Vec<Host> = restricted
        .into_iter()
        .filter(|host| !canaries.contains(host))
        .collect();
    remainder.sort_by(|a, b| b.id.cmp(&a.id));

    let mut ordered = canaries;
    ordered.extend(interleaved(&remainder).into_iter().rev());
    Ok(ordered)
}
