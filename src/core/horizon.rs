use serde_json::Value;

use super::types::{CHECKPOINT_YEARS, CashflowPoint, HORIZON_YEARS};

const ANNUAL_SLOTS: usize = HORIZON_YEARS as usize + 1;

type AnnualSeries = [Option<f64>; ANNUAL_SLOTS];

/// Normalizes an untrusted list of `{year, end_assets}` records into the six
/// checkpoint years 0, 5, .., 25.
///
/// Never fails: anything that is not a JSON array, and every record that does
/// not coerce cleanly, degrades to the all-zero series or is skipped.
///
/// Depletion is permanent. Once the annual series reaches zero every later
/// year reports zero, even when a later raw point claims assets again.
pub fn enforce_cashflow_horizon(raw: &Value) -> Vec<CashflowPoint> {
    let Some(records) = raw.as_array() else {
        return zero_series();
    };
    normalize_points(records.iter().filter_map(sanitize_record))
}

/// Same normalization for already-typed `(year, end_assets)` pairs. Years past
/// the horizon and infinite amounts are skipped; NaN and negatives clamp to zero.
pub fn normalize_points<I>(points: I) -> Vec<CashflowPoint>
where
    I: IntoIterator<Item = (u32, f64)>,
{
    let Some(annual) = dense_series(points) else {
        return zero_series();
    };
    CHECKPOINT_YEARS
        .iter()
        .map(|&year| CashflowPoint {
            year,
            end_assets: round_cents(annual[year as usize]),
        })
        .collect()
}

fn dense_series<I>(points: I) -> Option<[f64; ANNUAL_SLOTS]>
where
    I: IntoIterator<Item = (u32, f64)>,
{
    let mut known: AnnualSeries = [None; ANNUAL_SLOTS];
    for (year, end_assets) in points {
        let Some(end_assets) = clamp_amount(end_assets) else {
            continue;
        };
        if let Some(slot) = known.get_mut(year as usize) {
            *slot = Some(end_assets);
        }
    }

    if known[0].is_none() {
        known[0] = Some(known.iter().flatten().next().copied()?);
    }

    Some(clamp_after_depletion(interpolate_gaps(&known)))
}

pub fn zero_series() -> Vec<CashflowPoint> {
    CHECKPOINT_YEARS
        .iter()
        .map(|&year| CashflowPoint {
            year,
            end_assets: 0.0,
        })
        .collect()
}

fn sanitize_record(record: &Value) -> Option<(u32, f64)> {
    let fields = record.as_object()?;
    let year = fields.get("year").and_then(parse_year)?;
    let end_assets = fields.get("end_assets").and_then(parse_amount)?;
    let year = u32::try_from(year).ok().filter(|y| *y <= HORIZON_YEARS)?;
    Some((year, clamp_amount(end_assets)?))
}

fn parse_year(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|v| v.is_finite())
                .map(|v| v.trunc() as i64)
        }),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        Value::Bool(b) => Some(i64::from(*b)),
        _ => None,
    }
}

fn parse_amount(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Bool(b) => Some(f64::from(u8::from(*b))),
        _ => None,
    }
}

// NaN counts as no assets left; +inf has no usable value.
fn clamp_amount(amount: f64) -> Option<f64> {
    if amount.is_nan() {
        return Some(0.0);
    }
    (amount != f64::INFINITY).then(|| amount.max(0.0))
}

fn interpolate_gaps(known: &AnnualSeries) -> AnnualSeries {
    let mut annual = *known;
    let mut previous: Option<(usize, f64)> = None;
    for (year, value) in known.iter().enumerate() {
        let Some(value) = *value else {
            continue;
        };
        if let Some((prev_year, prev_value)) = previous {
            let span = year - prev_year;
            for step in 1..span {
                let ratio = step as f64 / span as f64;
                annual[prev_year + step] = Some(lerp(prev_value, value, ratio).max(0.0));
            }
        }
        previous = Some((year, value));
    }
    annual
}

fn clamp_after_depletion(mut annual: AnnualSeries) -> [f64; ANNUAL_SLOTS] {
    let mut dense = [0.0; ANNUAL_SLOTS];
    let mut depleted = false;
    for year in 0..ANNUAL_SLOTS {
        let value = match annual[year] {
            Some(v) => v,
            None => estimate_missing(&annual, year).max(0.0),
        };
        let value = if depleted || value <= 0.0 {
            depleted = true;
            0.0
        } else {
            value
        };
        annual[year] = Some(value);
        dense[year] = value;
    }
    dense
}

// With year 0 anchored, only years past the last known point land here.
fn estimate_missing(annual: &AnnualSeries, year: usize) -> f64 {
    let previous = (0..year).rev().find_map(|y| annual[y].map(|v| (y, v)));
    let next = (year + 1..ANNUAL_SLOTS).find_map(|y| annual[y].map(|v| (y, v)));
    match (previous, next) {
        (Some((prev_year, prev_value)), Some((next_year, next_value))) => {
            let ratio = (year - prev_year) as f64 / (next_year - prev_year) as f64;
            lerp(prev_value, next_value, ratio)
        }
        (Some((_, value)), None) | (None, Some((_, value))) => value,
        (None, None) => 0.0,
    }
}

fn lerp(from: f64, to: f64, ratio: f64) -> f64 {
    from + (to - from) * ratio
}

fn round_cents(value: f64) -> f64 {
    let cents = value * 100.0;
    if !cents.is_finite() {
        return value;
    }
    cents.round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    const EPS: f64 = 1e-6;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    fn values(series: &[CashflowPoint]) -> Vec<f64> {
        series.iter().map(|p| p.end_assets).collect()
    }

    fn years(series: &[CashflowPoint]) -> Vec<u32> {
        series.iter().map(|p| p.year).collect()
    }

    #[test]
    fn canonical_series_passes_through_unchanged() {
        let raw = json!([
            {"year": 0, "end_assets": 100000},
            {"year": 5, "end_assets": 140000},
            {"year": 10, "end_assets": 160000},
            {"year": 15, "end_assets": 170000},
            {"year": 20, "end_assets": 190000},
            {"year": 25, "end_assets": 210000}
        ]);
        let out = enforce_cashflow_horizon(&raw);
        assert_eq!(years(&out), CHECKPOINT_YEARS.to_vec());
        assert_eq!(
            values(&out),
            vec![100000.0, 140000.0, 160000.0, 170000.0, 190000.0, 210000.0]
        );
    }

    #[test]
    fn gaps_interpolate_linearly_toward_depletion() {
        let raw = json!([
            {"year": 0, "end_assets": 50000},
            {"year": 5, "end_assets": 20000},
            {"year": 20, "end_assets": 0}
        ]);
        let out = enforce_cashflow_horizon(&raw);
        assert_eq!(years(&out), CHECKPOINT_YEARS.to_vec());
        assert_approx(out[0].end_assets, 50000.0);
        assert_approx(out[1].end_assets, 20000.0);
        assert_approx(out[2].end_assets, 13333.33);
        assert_approx(out[3].end_assets, 6666.67);
        assert!(out[2].end_assets > out[3].end_assets);
        assert!(out[3].end_assets > 0.0 && out[2].end_assets < 20000.0);
        assert_eq!(out[4].end_assets, 0.0);
        assert_eq!(out[5].end_assets, 0.0);
    }

    #[test]
    fn off_grid_and_out_of_range_noise_does_not_move_checkpoints() {
        let clean = json!([
            {"year": 0, "end_assets": 100000},
            {"year": 5, "end_assets": 140000},
            {"year": 10, "end_assets": 160000},
            {"year": 15, "end_assets": 170000},
            {"year": 20, "end_assets": 190000},
            {"year": 25, "end_assets": 210000}
        ]);
        let noisy = json!([
            {"year": 0, "end_assets": 100000},
            {"year": 1, "end_assets": 90000},
            {"year": 7, "end_assets": 150000},
            {"year": 5, "end_assets": 140000},
            {"year": 3, "end_assets": 95000},
            {"year": 10, "end_assets": 160000},
            {"year": 30, "end_assets": 500000},
            {"year": 15, "end_assets": 170000},
            {"year": 20, "end_assets": 190000},
            {"year": 25, "end_assets": 210000}
        ]);
        assert_eq!(
            enforce_cashflow_horizon(&noisy),
            enforce_cashflow_horizon(&clean)
        );
    }

    #[test]
    fn empty_and_non_list_inputs_fall_back_to_zero_series() {
        for raw in [
            json!([]),
            json!("not a list"),
            Value::Null,
            json!({"year": 0, "end_assets": 100}),
            json!(42),
        ] {
            let out = enforce_cashflow_horizon(&raw);
            assert_eq!(years(&out), CHECKPOINT_YEARS.to_vec());
            assert!(out.iter().all(|p| p.end_assets == 0.0), "input {raw}");
        }
    }

    #[test]
    fn entirely_invalid_records_fall_back_to_zero_series() {
        let raw = json!([
            "junk",
            7,
            null,
            {"year": null, "end_assets": 100},
            {"year": [0], "end_assets": 100},
            {"year": 5},
            {"end_assets": 5},
            {"year": 5, "end_assets": "abc"},
            {"year": 5, "end_assets": "inf"},
            {"year": 5, "end_assets": {"value": 1}},
            {"year": "5.0", "end_assets": 100},
            {"year": 40, "end_assets": 100}
        ]);
        assert_eq!(enforce_cashflow_horizon(&raw), zero_series());
    }

    #[test]
    fn numeric_strings_and_float_years_are_coerced() {
        let raw = json!([
            {"year": " 0 ", "end_assets": "1000.5"},
            {"year": 10.9, "end_assets": "2000"},
            {"year": "25", "end_assets": 3000.0}
        ]);
        let out = enforce_cashflow_horizon(&raw);
        assert_approx(out[0].end_assets, 1000.5);
        assert_approx(out[1].end_assets, 1500.25);
        assert_approx(out[2].end_assets, 2000.0);
        assert_approx(out[3].end_assets, 2333.33);
        assert_approx(out[5].end_assets, 3000.0);
    }

    #[test]
    fn out_of_range_years_are_dropped_not_clipped() {
        let raw = json!([
            {"year": -1, "end_assets": 0},
            {"year": 5, "end_assets": 100},
            {"year": 26, "end_assets": 0}
        ]);
        let out = enforce_cashflow_horizon(&raw);
        assert_eq!(values(&out), vec![100.0; 6]);
    }

    #[test]
    fn negative_assets_clamp_to_zero_and_deplete() {
        let raw = json!([
            {"year": 0, "end_assets": 1000},
            {"year": 5, "end_assets": -250}
        ]);
        let out = enforce_cashflow_horizon(&raw);
        assert_eq!(values(&out), vec![1000.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn duplicate_years_keep_the_last_record() {
        let raw = json!([
            {"year": 5, "end_assets": 1000},
            {"year": 0, "end_assets": 500},
            {"year": 5, "end_assets": 2000}
        ]);
        let out = enforce_cashflow_horizon(&raw);
        assert_eq!(
            values(&out),
            vec![500.0, 2000.0, 2000.0, 2000.0, 2000.0, 2000.0]
        );
    }

    #[test]
    fn missing_year_zero_is_anchored_to_earliest_point() {
        let raw = json!([
            {"year": 20, "end_assets": 40000},
            {"year": 10, "end_assets": 80000}
        ]);
        let out = enforce_cashflow_horizon(&raw);
        assert_eq!(
            values(&out),
            vec![80000.0, 80000.0, 80000.0, 60000.0, 40000.0, 40000.0]
        );
    }

    #[test]
    fn single_mid_horizon_point_stays_flat() {
        let raw = json!([{"year": 12, "end_assets": 80000}]);
        assert_eq!(values(&enforce_cashflow_horizon(&raw)), vec![80000.0; 6]);
    }

    #[test]
    fn sole_year_zero_point_assumes_no_decay() {
        let raw = json!([{"year": 0, "end_assets": 123456.789}]);
        assert_eq!(values(&enforce_cashflow_horizon(&raw)), vec![123456.79; 6]);
    }

    #[test]
    fn depletion_between_checkpoints_zeroes_the_rest() {
        let raw = json!([
            {"year": 0, "end_assets": 100000},
            {"year": 12, "end_assets": 0}
        ]);
        let out = enforce_cashflow_horizon(&raw);
        assert_approx(out[1].end_assets, 58333.33);
        assert_approx(out[2].end_assets, 16666.67);
        assert_eq!(&values(&out)[3..], &[0.0, 0.0, 0.0]);
    }

    // A later point claiming recovered assets is overridden by the depletion
    // clamp. Callers relying on recoveries after a zero year will see zeros.
    #[test]
    fn depletion_is_permanent_even_if_assets_reappear() {
        let raw = json!([
            {"year": 0, "end_assets": 100},
            {"year": 5, "end_assets": 0},
            {"year": 10, "end_assets": 500},
            {"year": 25, "end_assets": 900}
        ]);
        let out = enforce_cashflow_horizon(&raw);
        assert_eq!(values(&out), vec![100.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn rounding_applies_only_when_sampling() {
        let raw = json!([
            {"year": 0, "end_assets": 0.004},
            {"year": 25, "end_assets": 0.004}
        ]);
        // Rounded to 0.0 on output, but the dense series never hit zero so no
        // depletion was triggered in between.
        let out = enforce_cashflow_horizon(&raw);
        assert_eq!(values(&out), vec![0.0; 6]);

        let raw = json!([
            {"year": 0, "end_assets": 10.0},
            {"year": 3, "end_assets": 0.01}
        ]);
        let out = enforce_cashflow_horizon(&raw);
        assert_eq!(values(&out), vec![10.0, 0.01, 0.01, 0.01, 0.01, 0.01]);
    }

    #[test]
    fn typed_points_follow_the_same_rules() {
        let out = normalize_points([(5, 200.0), (30, 0.0), (10, f64::INFINITY), (15, -5.0)]);
        assert_eq!(values(&out), vec![200.0, 200.0, 100.0, 0.0, 0.0, 0.0]);
        let out = normalize_points([(0, 200.0), (10, f64::NAN), (20, 300.0)]);
        assert_eq!(values(&out), vec![200.0, 100.0, 0.0, 0.0, 0.0, 0.0]);
        assert_eq!(normalize_points(std::iter::empty::<(u32, f64)>()), zero_series());
    }

    #[test]
    fn boolean_fields_coerce_to_zero_or_one() {
        let raw = json!([{"year": true, "end_assets": 100}]);
        assert_eq!(values(&enforce_cashflow_horizon(&raw)), vec![100.0; 6]);

        let raw = json!([
            {"year": false, "end_assets": 250},
            {"year": 10, "end_assets": true}
        ]);
        let out = enforce_cashflow_horizon(&raw);
        assert_eq!(values(&out), vec![250.0, 125.5, 1.0, 1.0, 1.0, 1.0]);
    }

    #[test]
    fn nan_assets_count_as_depleted() {
        let raw = json!([
            {"year": 0, "end_assets": 100},
            {"year": 5, "end_assets": "NaN"}
        ]);
        let out = enforce_cashflow_horizon(&raw);
        assert_eq!(values(&out), vec![100.0, 0.0, 0.0, 0.0, 0.0, 0.0]);

        let raw = json!([
            {"year": 0, "end_assets": 100},
            {"year": 5, "end_assets": "-inf"}
        ]);
        let out = enforce_cashflow_horizon(&raw);
        assert_eq!(values(&out), vec![100.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn huge_finite_assets_survive_rounding() {
        let raw = json!([{"year": 0, "end_assets": 1e307}]);
        let out = enforce_cashflow_horizon(&raw);
        assert_eq!(values(&out), vec![1e307; 6]);

        let json = serde_json::to_string(&out).expect("series should serialize");
        assert!(!json.contains("null"), "{json}");

        let raw = json!([
            {"year": 0, "end_assets": 1.7e308},
            {"year": 25, "end_assets": 0}
        ]);
        for point in enforce_cashflow_horizon(&raw) {
            assert!(point.end_assets.is_finite() && point.end_assets >= 0.0);
        }
    }

    // Rounding happens only at sampling, so a sub-cent start reports 0.0 while
    // later checkpoints stay positive. The dense series itself never depleted.
    #[test]
    fn sub_cent_start_rounds_to_zero_without_depleting() {
        let raw = json!([
            {"year": 0, "end_assets": 0.004},
            {"year": 25, "end_assets": 1000}
        ]);
        let out = enforce_cashflow_horizon(&raw);
        assert_eq!(values(&out), vec![0.0, 200.0, 400.0, 600.0, 800.0, 1000.0]);
    }

    fn sanitized(raw: &Value) -> Vec<(u32, f64)> {
        raw.as_array()
            .map(|records| records.iter().filter_map(sanitize_record).collect())
            .unwrap_or_default()
    }

    fn year_field() -> impl Strategy<Value = Value> {
        prop_oneof![
            4 => (-5i64..35).prop_map(Value::from),
            1 => (-5.0f64..35.0).prop_map(Value::from),
            1 => (-5i64..35).prop_map(|y| Value::from(y.to_string())),
            1 => Just(Value::Null),
            1 => any::<bool>().prop_map(Value::from),
            1 => "[a-z]{0,4}".prop_map(Value::from),
        ]
    }

    fn amount_field() -> impl Strategy<Value = Value> {
        prop_oneof![
            4 => (-50_000.0f64..2_000_000.0).prop_map(Value::from),
            1 => Just(Value::from(0)),
            1 => (0u32..500_000).prop_map(|v| Value::from(v.to_string())),
            1 => Just(Value::Null),
            1 => "[a-z]{0,4}".prop_map(Value::from),
        ]
    }

    fn raw_series() -> impl Strategy<Value = Value> {
        let record = (year_field(), amount_field())
            .prop_map(|(year, end_assets)| json!({"year": year, "end_assets": end_assets}));
        prop_oneof![
            6 => prop::collection::vec(record, 0..20).prop_map(Value::from),
            1 => Just(Value::Null),
            1 => "[a-z ]{0,12}".prop_map(Value::from),
        ]
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(256))]

        #[test]
        fn prop_output_is_six_non_negative_checkpoints(raw in raw_series()) {
            let out = enforce_cashflow_horizon(&raw);
            prop_assert_eq!(years(&out), CHECKPOINT_YEARS.to_vec());
            for point in &out {
                prop_assert!(point.end_assets.is_finite());
                prop_assert!(point.end_assets >= 0.0);
            }
        }

        #[test]
        fn prop_dense_depletion_is_permanent(raw in raw_series()) {
            if let Some(dense) = dense_series(sanitized(&raw)) {
                if let Some(first_zero) = dense.iter().position(|v| *v == 0.0) {
                    for value in &dense[first_zero..] {
                        prop_assert_eq!(*value, 0.0);
                    }
                }
            }
        }

        // Checkpoint monotonicity holds whenever no dense value is a positive
        // amount that rounds down to 0.0.
        #[test]
        fn prop_checkpoint_depletion_is_monotonic(raw in raw_series()) {
            let dense = dense_series(sanitized(&raw));
            prop_assume!(dense.is_none_or(|d| d.iter().all(|v| *v == 0.0 || *v >= 0.005)));
            let out = enforce_cashflow_horizon(&raw);
            if let Some(first_zero) = out.iter().position(|p| p.end_assets == 0.0) {
                for point in &out[first_zero..] {
                    prop_assert_eq!(point.end_assets, 0.0);
                }
            }
        }

        #[test]
        fn prop_positive_canonical_series_is_a_fixed_point(
            cents in prop::collection::vec(1u64..1_000_000_000, 6)
        ) {
            let expected: Vec<f64> = cents.iter().map(|c| *c as f64 / 100.0).collect();
            let raw = Value::from(
                CHECKPOINT_YEARS
                    .iter()
                    .zip(&expected)
                    .map(|(year, amount)| json!({"year": year, "end_assets": amount}))
                    .collect::<Vec<_>>(),
            );
            prop_assert_eq!(values(&enforce_cashflow_horizon(&raw)), expected);
        }
    }
}
