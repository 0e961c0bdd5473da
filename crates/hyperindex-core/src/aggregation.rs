//! Aggregation engine
//!
//! Reduces the positions of every cohort wallet into per-asset conviction,
//! tilt and leverage figures plus portfolio totals. The reduction is a pure
//! function of its inputs: the only outside value it reads is the injected
//! clock used to stamp `generated_at`.

use std::collections::BTreeMap;

use crate::clock::Clock;
use crate::error::{AggregationError, AggregationResult};
use crate::models::*;

/// Wallet nets smaller than this are treated as flat.
const FLAT_EPSILON: f64 = 1e-8;

/// Equity normaliser for the square-root weighting of `equity_conviction`.
const EQUITY_WEIGHT_UNIT: f64 = 100_000.0;

/// Fetch results for one run, in cohort order.
#[derive(Debug, Clone, Default)]
pub struct CohortPositions {
    /// Wallets whose fetch succeeded, including those with no positions
    pub wallets: Vec<WalletPositions>,

    /// Wallets excluded from this run because their fetch failed
    pub wallets_failed: usize,
}

impl CohortPositions {
    pub fn wallets_total(&self) -> usize {
        self.wallets.len() + self.wallets_failed
    }
}

#[derive(Debug, Clone, Default)]
pub struct AggregationParams {
    /// Assets whose long and short notional are both below this are left out
    /// of the asset rows. They still count toward portfolio totals.
    pub min_asset_notional: f64,

    pub cohort_rebalanced_at: Option<String>,
}

/// Running sums for one asset while walking the cohort.
#[derive(Debug, Default)]
struct AssetBook {
    long_notional: f64,
    short_notional: f64,
    leverage_weighted: f64,
    margin_used: f64,
    position_count: usize,
    /// (net notional, equity) for every wallet holding the asset
    wallet_nets: Vec<(f64, f64)>,
}

impl AssetBook {
    fn add_position(&mut self, position: &Position) {
        match position.side {
            Side::Long => self.long_notional += position.notional_value,
            Side::Short => self.short_notional += position.notional_value,
        }
        self.leverage_weighted += position.notional_value * position.leverage;
        self.margin_used += position.margin_used;
        self.position_count += 1;
    }

    fn gross(&self) -> f64 {
        self.long_notional + self.short_notional
    }
}

/// Aggregate a cohort's positions into a [`Snapshot`].
///
/// Fails with [`AggregationError::EmptyCohort`] when no wallet made it into
/// the run: a zero-wallet snapshot must never become "latest".
pub fn aggregate(
    cohort: &CohortPositions,
    params: &AggregationParams,
    clock: &dyn Clock,
) -> AggregationResult<Snapshot> {
    if cohort.wallets.is_empty() {
        return Err(AggregationError::EmptyCohort);
    }
    validate_finite(cohort)?;

    let cohort_size = cohort.wallets.len();
    let total_equity: f64 = cohort.wallets.iter().map(|w| w.equity).sum();
    let books = build_books(cohort);

    let mut totals = PortfolioTotals {
        total_equity,
        ..PortfolioTotals::default()
    };
    let mut leverage_weighted = 0.0;
    let mut assets = Vec::with_capacity(books.len());

    for (asset, book) in &books {
        totals.gross_long += book.long_notional;
        totals.gross_short += book.short_notional;
        leverage_weighted += book.leverage_weighted;

        if book.long_notional < params.min_asset_notional
            && book.short_notional < params.min_asset_notional
        {
            continue;
        }
        assets.push(asset_aggregate(asset, book, cohort_size, total_equity));
    }

    totals.net_exposure = totals.gross_long - totals.gross_short;
    totals.gross_notional = totals.gross_long + totals.gross_short;
    totals.net_leverage = ratio(leverage_weighted, totals.gross_notional);
    totals.cohort_leverage = ratio(totals.gross_notional, total_equity);

    let listed_gross: f64 = assets.iter().map(|a| a.gross_notional()).sum();
    let conviction_weighted: f64 = assets.iter().map(|a| a.conviction * a.gross_notional()).sum();
    let equity_weighted: f64 = assets
        .iter()
        .map(|a| a.equity_leverage * a.gross_notional())
        .sum();
    totals.conviction = ratio(conviction_weighted, listed_gross);
    totals.index_score = ratio(equity_weighted, listed_gross);

    assets.sort_by(|a, b| {
        b.net_exposure
            .abs()
            .total_cmp(&a.net_exposure.abs())
            .then_with(|| a.asset.cmp(&b.asset))
    });

    Ok(Snapshot {
        generated_at: clock.now(),
        cohort_rebalanced_at: params.cohort_rebalanced_at.clone(),
        cohort_size,
        wallets_total: cohort.wallets_total(),
        wallets_failed: cohort.wallets_failed,
        totals,
        assets,
    })
}

fn validate_finite(cohort: &CohortPositions) -> AggregationResult<()> {
    for wallet in &cohort.wallets {
        if !wallet.equity.is_finite() {
            return Err(AggregationError::NonFinite {
                wallet: wallet.wallet.to_string(),
                asset: "*".to_string(),
                field: "equity",
            });
        }
        for position in &wallet.positions {
            let fields = [
                ("notional_value", position.notional_value),
                ("leverage", position.leverage),
                ("margin_used", position.margin_used),
            ];
            if let Some((field, _)) = fields.into_iter().find(|(_, v)| !v.is_finite()) {
                return Err(AggregationError::NonFinite {
                    wallet: wallet.wallet.to_string(),
                    asset: position.asset.clone(),
                    field,
                });
            }
        }
    }
    Ok(())
}

/// Walk the cohort in order, accumulating per-asset sums and per-wallet nets.
fn build_books(cohort: &CohortPositions) -> BTreeMap<&str, AssetBook> {
    let mut books: BTreeMap<&str, AssetBook> = BTreeMap::new();

    for wallet in &cohort.wallets {
        let mut wallet_net: BTreeMap<&str, f64> = BTreeMap::new();
        for position in &wallet.positions {
            books
                .entry(position.asset.as_str())
                .or_default()
                .add_position(position);
            *wallet_net.entry(position.asset.as_str()).or_default() += position.signed_notional();
        }
        for (asset, net) in wallet_net {
            if let Some(book) = books.get_mut(asset) {
                book.wallet_nets.push((net, wallet.equity));
            }
        }
    }

    books
}

fn asset_aggregate(
    asset: &str,
    book: &AssetBook,
    cohort_size: usize,
    total_equity: f64,
) -> AssetAggregate {
    let net_exposure = book.long_notional - book.short_notional;
    let gross = book.gross();
    let tilt = ratio(net_exposure, gross).clamp(-1.0, 1.0);

    let long_wallets = book
        .wallet_nets
        .iter()
        .filter(|(net, _)| *net > FLAT_EPSILON)
        .count();
    let short_wallets = book
        .wallet_nets
        .iter()
        .filter(|(net, _)| *net < -FLAT_EPSILON)
        .count();

    let conviction = conviction(tilt, net_exposure, long_wallets, short_wallets, cohort_size);

    AssetAggregate {
        asset: asset.to_string(),
        net_exposure,
        long_notional: book.long_notional,
        short_notional: book.short_notional,
        conviction,
        tilt,
        net_leverage: ratio(book.leverage_weighted, gross),
        position_count: book.position_count,
        long_wallets,
        short_wallets,
        margin_leverage: ratio(net_exposure, book.margin_used),
        equity_leverage: ratio(net_exposure, total_equity),
        equity_conviction: equity_conviction(&book.wallet_nets),
    }
}

/// Tilt weighted by the fraction of the cohort positioned on the dominant side.
///
/// Many wallets agreeing scores higher than one large wallet at the same
/// notional; full participation on one side gives exactly ±1.
fn conviction(
    tilt: f64,
    net_exposure: f64,
    long_wallets: usize,
    short_wallets: usize,
    cohort_size: usize,
) -> f64 {
    let agreeing = match Side::from_signed(net_exposure) {
        Some(Side::Long) => long_wallets,
        Some(Side::Short) => short_wallets,
        None => return 0.0,
    };
    let breadth = agreeing as f64 / cohort_size as f64;
    (tilt * breadth).clamp(-1.0, 1.0)
}

/// Direction agreement weighted by each wallet's leverage on equity and the
/// square root of its equity, so whales count more without dominating.
fn equity_conviction(wallet_nets: &[(f64, f64)]) -> f64 {
    let mut signed = 0.0;
    let mut weight_sum = 0.0;

    for &(net, equity) in wallet_nets {
        if net.abs() < FLAT_EPSILON || equity <= 0.0 {
            continue;
        }
        let leverage = (net / equity).abs();
        let weight = leverage * (equity / EQUITY_WEIGHT_UNIT).sqrt();
        signed += net.signum() * weight;
        weight_sum += weight;
    }

    ratio(signed, weight_sum).clamp(-1.0, 1.0)
}

/// `numerator / denominator`, or 0 when the denominator is not positive.
fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator > 0.0 {
        numerator / denominator
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use chrono::{TimeZone, Utc};

    const BTC_PRICE: f64 = 50_000.0;

    fn clock() -> FixedClock {
        FixedClock(Utc.with_ymd_and_hms(2026, 2, 18, 12, 0, 0).unwrap())
    }

    fn wallet(n: u8) -> Wallet {
        Wallet::parse(&format!("0x{:040x}", n)).unwrap()
    }

    fn position(asset: &str, side: Side, size: f64, price: f64, leverage: f64) -> Position {
        let notional = size * price;
        Position {
            asset: asset.to_string(),
            side,
            size,
            notional_value: notional,
            leverage,
            entry_price: Some(price),
            margin_used: notional / leverage,
        }
    }

    fn holder(n: u8, equity: f64, positions: Vec<Position>) -> WalletPositions {
        WalletPositions {
            wallet: wallet(n),
            equity,
            positions,
        }
    }

    fn run(wallets: Vec<WalletPositions>) -> Snapshot {
        let cohort = CohortPositions {
            wallets,
            wallets_failed: 0,
        };
        aggregate(&cohort, &AggregationParams::default(), &clock()).unwrap()
    }

    #[test]
    fn test_long_short_scenario() {
        let snapshot = run(vec![
            holder(1, 100_000.0, vec![position("BTC", Side::Long, 10.0, BTC_PRICE, 10.0)]),
            holder(2, 100_000.0, vec![position("BTC", Side::Short, 4.0, BTC_PRICE, 5.0)]),
        ]);

        let btc = snapshot.asset("BTC").unwrap();
        assert_eq!(btc.long_notional, 10.0 * BTC_PRICE);
        assert_eq!(btc.short_notional, 4.0 * BTC_PRICE);
        assert_eq!(btc.net_exposure, 6.0 * BTC_PRICE);
        assert!((btc.tilt - 6.0 / 14.0).abs() < 1e-12);
        assert!(btc.tilt > 0.0);
        // One of two wallets agrees with the long tilt
        assert!((btc.conviction - 6.0 / 14.0 * 0.5).abs() < 1e-12);
        // (500k * 10 + 200k * 5) / 700k
        assert!((btc.net_leverage - 6_000_000.0 / 700_000.0).abs() < 1e-9);
        assert_eq!(btc.long_wallets, 1);
        assert_eq!(btc.short_wallets, 1);
        assert_eq!(snapshot.cohort_size, 2);
    }

    #[test]
    fn test_one_sided_full_participation() {
        let snapshot = run(vec![
            holder(1, 50_000.0, vec![position("ETH", Side::Short, 5.0, 3000.0, 3.0)]),
            holder(2, 50_000.0, vec![position("ETH", Side::Short, 1.0, 3000.0, 2.0)]),
            holder(3, 50_000.0, vec![position("ETH", Side::Short, 9.0, 3000.0, 20.0)]),
        ]);

        let eth = snapshot.asset("ETH").unwrap();
        assert_eq!(eth.tilt, -1.0);
        assert_eq!(eth.conviction, -1.0);
        assert_eq!(eth.equity_conviction, -1.0);
    }

    #[test]
    fn test_breadth_beats_single_whale() {
        let whale = run(vec![
            holder(1, 1.0e6, vec![position("SOL", Side::Long, 1000.0, 100.0, 5.0)]),
            holder(2, 1.0e6, vec![]),
            holder(3, 1.0e6, vec![]),
            holder(4, 1.0e6, vec![]),
        ]);
        let crowd = run(vec![
            holder(1, 1.0e6, vec![position("SOL", Side::Long, 250.0, 100.0, 5.0)]),
            holder(2, 1.0e6, vec![position("SOL", Side::Long, 250.0, 100.0, 5.0)]),
            holder(3, 1.0e6, vec![position("SOL", Side::Long, 250.0, 100.0, 5.0)]),
            holder(4, 1.0e6, vec![position("SOL", Side::Long, 250.0, 100.0, 5.0)]),
        ]);

        let whale_sol = whale.asset("SOL").unwrap();
        let crowd_sol = crowd.asset("SOL").unwrap();
        assert_eq!(whale_sol.net_exposure, crowd_sol.net_exposure);
        assert_eq!(whale_sol.tilt, crowd_sol.tilt);
        assert_eq!(whale_sol.conviction, 0.25);
        assert_eq!(crowd_sol.conviction, 1.0);
    }

    #[test]
    fn test_single_holder_still_gets_row() {
        let snapshot = run(vec![
            holder(1, 10_000.0, vec![position("HYPE", Side::Long, 100.0, 25.0, 2.0)]),
            holder(2, 10_000.0, vec![position("BTC", Side::Long, 1.0, BTC_PRICE, 2.0)]),
        ]);
        let hype = snapshot.asset("HYPE").unwrap();
        assert_eq!(hype.position_count, 1);
        assert_eq!(hype.conviction, 0.5);
    }

    #[test]
    fn test_absent_asset_not_listed() {
        let snapshot = run(vec![holder(
            1,
            10_000.0,
            vec![position("BTC", Side::Long, 1.0, BTC_PRICE, 2.0)],
        )]);
        assert!(snapshot.asset("ETH").is_none());
        assert_eq!(snapshot.assets.len(), 1);
    }

    #[test]
    fn test_flat_wallet_counts_toward_cohort() {
        let snapshot = run(vec![
            holder(1, 10_000.0, vec![]),
            holder(2, 10_000.0, vec![position("BTC", Side::Long, 1.0, BTC_PRICE, 2.0)]),
        ]);
        assert_eq!(snapshot.cohort_size, 2);
        assert_eq!(snapshot.asset("BTC").unwrap().conviction, 0.5);
    }

    #[test]
    fn test_balanced_asset_has_no_conviction() {
        let snapshot = run(vec![
            holder(1, 10_000.0, vec![position("ETH", Side::Long, 2.0, 3000.0, 2.0)]),
            holder(2, 10_000.0, vec![position("ETH", Side::Short, 2.0, 3000.0, 2.0)]),
        ]);
        let eth = snapshot.asset("ETH").unwrap();
        assert_eq!(eth.net_exposure, 0.0);
        assert_eq!(eth.tilt, 0.0);
        assert_eq!(eth.conviction, 0.0);
    }

    #[test]
    fn test_empty_cohort_is_an_error() {
        let result = aggregate(
            &CohortPositions {
                wallets: vec![],
                wallets_failed: 3,
            },
            &AggregationParams::default(),
            &clock(),
        );
        assert_eq!(result.unwrap_err(), AggregationError::EmptyCohort);
    }

    #[test]
    fn test_non_finite_is_rejected() {
        let mut bad = position("BTC", Side::Long, 1.0, BTC_PRICE, 2.0);
        bad.leverage = f64::NAN;
        let result = aggregate(
            &CohortPositions {
                wallets: vec![holder(1, 1.0, vec![bad])],
                wallets_failed: 0,
            },
            &AggregationParams::default(),
            &clock(),
        );
        assert!(matches!(
            result,
            Err(AggregationError::NonFinite { field: "leverage", .. })
        ));
    }

    #[test]
    fn test_ordering_by_abs_net_then_symbol() {
        let snapshot = run(vec![holder(
            1,
            1.0e6,
            vec![
                position("AAA", Side::Long, 1.0, 1000.0, 1.0),
                position("ZZZ", Side::Short, 1.0, 1000.0, 1.0),
                position("MMM", Side::Short, 1.0, 5000.0, 1.0),
                position("BBB", Side::Long, 1.0, 1000.0, 1.0),
            ],
        )]);
        let order: Vec<&str> = snapshot.assets.iter().map(|a| a.asset.as_str()).collect();
        assert_eq!(order, vec!["MMM", "AAA", "BBB", "ZZZ"]);
    }

    #[test]
    fn test_aggregate_is_deterministic() {
        let wallets = vec![
            holder(1, 7.0e5, vec![
                position("BTC", Side::Long, 0.3, 61_234.5, 7.0),
                position("ETH", Side::Short, 3.3, 3111.1, 4.0),
            ]),
            holder(2, 2.0e5, vec![position("ETH", Side::Long, 1.1, 3111.1, 9.0)]),
            holder(3, 9.0e5, vec![position("BTC", Side::Short, 0.7, 61_234.5, 2.0)]),
        ];
        assert_eq!(run(wallets.clone()), run(wallets));
    }

    #[test]
    fn test_tilt_and_conviction_bounds() {
        let sides = [Side::Long, Side::Short];
        let mut wallets = Vec::new();
        for n in 0..12u8 {
            let side = sides[(n % 2) as usize];
            let size = 0.1 + f64::from(n) * 0.37;
            wallets.push(holder(n, 1.0e5 * f64::from(n + 1), vec![
                position("BTC", side, size, BTC_PRICE, 1.0 + f64::from(n)),
                position("ETH", sides[((n / 3) % 2) as usize], size * 7.0, 3000.0, 3.0),
            ]));
        }
        let snapshot = run(wallets);
        for asset in &snapshot.assets {
            assert!(asset.gross_notional() > 0.0);
            assert!((-1.0..=1.0).contains(&asset.tilt));
            assert!((-1.0..=1.0).contains(&asset.conviction));
            assert!((-1.0..=1.0).contains(&asset.equity_conviction));
            assert_eq!(asset.net_exposure, asset.long_notional - asset.short_notional);
            assert!(asset.conviction * asset.tilt >= 0.0);
        }
    }

    #[test]
    fn test_min_notional_filter_keeps_totals() {
        let wallets = vec![holder(
            1,
            1.0e6,
            vec![
                position("BTC", Side::Long, 10.0, BTC_PRICE, 5.0),
                position("DOGE", Side::Long, 1000.0, 0.1, 5.0),
            ],
        )];
        let params = AggregationParams {
            min_asset_notional: 250_000.0,
            cohort_rebalanced_at: Some("2026-02-18".to_string()),
        };
        let snapshot = aggregate(
            &CohortPositions { wallets, wallets_failed: 1 },
            &params,
            &clock(),
        )
        .unwrap();

        assert!(snapshot.asset("DOGE").is_none());
        assert_eq!(snapshot.totals.gross_long, 10.0 * BTC_PRICE + 100.0);
        assert_eq!(snapshot.wallets_total, 2);
        assert_eq!(snapshot.wallets_failed, 1);
        assert_eq!(snapshot.cohort_rebalanced_at.as_deref(), Some("2026-02-18"));
    }

    #[test]
    fn test_portfolio_totals() {
        let snapshot = run(vec![
            holder(1, 250_000.0, vec![position("BTC", Side::Long, 10.0, BTC_PRICE, 10.0)]),
            holder(2, 250_000.0, vec![position("BTC", Side::Short, 4.0, BTC_PRICE, 5.0)]),
        ]);
        let totals = &snapshot.totals;
        assert_eq!(totals.gross_notional, 700_000.0);
        assert_eq!(totals.net_exposure, 300_000.0);
        assert_eq!(totals.total_equity, 500_000.0);
        assert!((totals.cohort_leverage - 1.4).abs() < 1e-12);
        let btc = snapshot.asset("BTC").unwrap();
        assert!((totals.conviction - btc.conviction).abs() < 1e-12);
        assert!((totals.index_score - 0.6).abs() < 1e-12);
        assert_eq!(snapshot.generated_at, clock().0);
    }
}
