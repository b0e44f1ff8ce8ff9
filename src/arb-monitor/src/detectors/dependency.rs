//! Dependency-solver plug-in.
//!
//! The core never evaluates logical constraints itself. An external solver
//! process receives one JSON object on stdin - the constraints file
//! contents plus the current books - and prints `{ "legs": [...], "edge" }`
//! on stdout. Timeouts, bad exits and unparseable output all mean "no
//! opportunity".

use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use common::{
    DependencyConfig, Leg, Opportunity, OpportunityKind, OrderSide, RiskLevel, Venue,
};

use super::{Snapshot, OPPORTUNITY_TTL_MS};

const DEPENDENCY_CONFIDENCE: f64 = 0.8;

#[derive(Debug, Deserialize)]
struct SolverLeg {
    #[serde(alias = "tokenId")]
    token_id: String,
    side: String,
    price: Decimal,
    shares: Decimal,
}

#[derive(Debug, Deserialize)]
struct SolverOutput {
    #[serde(default)]
    legs: Vec<SolverLeg>,
    edge: Decimal,
}

/// Run the external solver against the snapshot. Returns at most one
/// bundle opportunity.
pub async fn solve(cfg: &DependencyConfig, snapshot: &Snapshot) -> Option<Opportunity> {
    let solver_path = cfg.solver_path.as_deref()?;
    let constraints_path = cfg.constraints_path.as_deref()?;

    let constraints: Value = match std::fs::read_to_string(constraints_path) {
        Ok(raw) => serde_json::from_str(&raw).unwrap_or(Value::String(raw)),
        Err(e) => {
            warn!("constraints file {constraints_path} unreadable: {e}");
            return None;
        }
    };

    let books: serde_json::Map<String, Value> = snapshot
        .books
        .iter()
        .filter(|((venue, _), _)| *venue == Venue::Predict)
        .map(|((_, token), book)| {
            (
                token.clone(),
                json!({
                    "bids": book.bids.iter().map(|l| json!({"price": l.price, "shares": l.shares})).collect::<Vec<_>>(),
                    "asks": book.asks.iter().map(|l| json!({"price": l.price, "shares": l.shares})).collect::<Vec<_>>(),
                }),
            )
        })
        .collect();

    let request = json!({
        "constraints": constraints,
        "books": books,
    });

    let mut child = match Command::new(solver_path)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            warn!("dependency solver {solver_path} failed to start: {e}");
            return None;
        }
    };

    if let Some(mut stdin) = child.stdin.take() {
        if stdin.write_all(request.to_string().as_bytes()).await.is_err() {
            return None;
        }
    }

    let output = match tokio::time::timeout(
        Duration::from_millis(cfg.timeout_ms),
        child.wait_with_output(),
    )
    .await
    {
        Ok(Ok(output)) if output.status.success() => output,
        Ok(Ok(output)) => {
            debug!("dependency solver exited with {}", output.status);
            return None;
        }
        Ok(Err(e)) => {
            warn!("dependency solver failed: {e}");
            return None;
        }
        Err(_) => {
            warn!("dependency solver timed out after {}ms", cfg.timeout_ms);
            return None;
        }
    };

    let parsed: SolverOutput = match serde_json::from_slice(&output.stdout) {
        Ok(p) => p,
        Err(e) => {
            debug!("dependency solver output unparseable: {e}");
            return None;
        }
    };

    if parsed.edge < cfg.min_edge || parsed.legs.is_empty() {
        return None;
    }
    if parsed.legs.len() > cfg.max_legs {
        debug!("dependency bundle rejected: {} legs", parsed.legs.len());
        return None;
    }

    let legs: Vec<Leg> = parsed
        .legs
        .into_iter()
        .filter_map(|leg| {
            let side = match leg.side.to_uppercase().as_str() {
                "BUY" => OrderSide::Buy,
                "SELL" => OrderSide::Sell,
                _ => return None,
            };
            Some(Leg {
                venue: Venue::Predict,
                token_id: leg.token_id,
                side,
                price: leg.price,
                shares: leg.shares.floor(),
            })
        })
        .collect();
    if legs.is_empty() {
        return None;
    }

    let notional: Decimal = legs.iter().map(Leg::notional).sum();
    if notional > cfg.max_notional {
        debug!("dependency bundle rejected: notional {notional}");
        return None;
    }

    let bundle_id = legs
        .iter()
        .map(|l| l.token_id.as_str())
        .collect::<Vec<_>>()
        .join("+");

    Some(Opportunity::new(
        OpportunityKind::Dependency { bundle_id },
        parsed.edge,
        DEPENDENCY_CONFIDENCE,
        RiskLevel::High,
        legs,
        OPPORTUNITY_TTL_MS,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::io::Write as _;

    fn cfg(solver: &str, constraints: &str) -> DependencyConfig {
        DependencyConfig {
            solver_path: Some(solver.to_string()),
            constraints_path: Some(constraints.to_string()),
            min_edge: dec!(0.02),
            max_legs: 4,
            max_notional: dec!(500),
            timeout_ms: 2_000,
        }
    }

    fn write_script(dir: &std::path::Path, body: &str) -> String {
        let path = dir.join("solver.sh");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "#!/bin/sh").unwrap();
        writeln!(file, "{body}").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        path.to_string_lossy().into_owned()
    }

    fn constraints_file(dir: &std::path::Path) -> String {
        let path = dir.join("dependency-constraints.json");
        std::fs::write(&path, r#"{ "implies": [["a", "b"]] }"#).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_solver_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let solver = write_script(
            dir.path(),
            r#"cat > /dev/null; echo '{"legs":[{"tokenId":"a","side":"BUY","price":0.4,"shares":50}],"edge":0.05}'"#,
        );
        let constraints = constraints_file(dir.path());

        let opp = solve(&cfg(&solver, &constraints), &Snapshot::default())
            .await
            .unwrap();
        assert_eq!(opp.edge, dec!(0.05));
        assert_eq!(opp.legs.len(), 1);
        assert_eq!(opp.legs[0].token_id, "a");
        match &opp.kind {
            OpportunityKind::Dependency { bundle_id } => assert_eq!(bundle_id, "a"),
            other => panic!("unexpected kind {other:?}"),
        }
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_solver_below_min_edge_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let solver = write_script(
            dir.path(),
            r#"cat > /dev/null; echo '{"legs":[{"tokenId":"a","side":"BUY","price":0.4,"shares":50}],"edge":0.001}'"#,
        );
        let constraints = constraints_file(dir.path());
        assert!(solve(&cfg(&solver, &constraints), &Snapshot::default())
            .await
            .is_none());
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_solver_garbage_output_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let solver = write_script(dir.path(), r#"cat > /dev/null; echo 'not json'"#);
        let constraints = constraints_file(dir.path());
        assert!(solve(&cfg(&solver, &constraints), &Snapshot::default())
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_unconfigured_solver_is_noop() {
        let cfg = DependencyConfig::default();
        assert!(solve(&cfg, &Snapshot::default()).await.is_none());
    }
}
