use stanza::style::{HAlign, Header, MinWidth, Separator, Styles};
use stanza::table::{Col, Row, Table};

use podium::bayes::UpdateSummary;
use podium::calibrate::search::CalibrationOutcome;
use podium::mc::Simulation;

use crate::forecast::Prediction;
use crate::registry::EntrantRegistry;

fn cols(labels: usize, values: usize) -> Vec<Col> {
    let mut cols = Vec::with_capacity(labels + values);
    for _ in 0..labels {
        cols.push(Col::new(
            Styles::default().with(MinWidth(10)).with(HAlign::Left),
        ));
    }
    for _ in 0..values {
        cols.push(Col::new(
            Styles::default().with(MinWidth(9)).with(HAlign::Right),
        ));
    }
    cols
}

fn header(labels: &[&str]) -> Row {
    Row::new(
        Styles::default().with(Header(true)).with(Separator(true)),
        labels.iter().map(|&label| label.into()).collect(),
    )
}

pub fn tabulate_simulation(simulation: &Simulation, registry: &EntrantRegistry) -> Table {
    let mut table = Table::default()
        .with_cols(cols(2, 6))
        .with_row(header(&[
            "Entrant", "Name", "Win", "Top-3", "Top-10", "E[pos]", "SD[pos]", "95% pos",
        ]));
    for stats in &simulation.stats {
        table.push_row(Row::new(
            Styles::default(),
            vec![
                stats.entrant.to_string().into(),
                registry.name(&stats.entrant).to_string().into(),
                format!("{:.6}", stats.win_probability).into(),
                format!("{:.6}", stats.top_3_probability).into(),
                format!("{:.6}", stats.top_10_probability).into(),
                format!("{:.3}", stats.expected_position).into(),
                format!("{:.3}", stats.position_std_dev()).into(),
                format!("{:.0}", stats.position_intervals.p95).into(),
            ],
        ));
    }
    table
}

pub fn tabulate_prediction(prediction: &Prediction, registry: &EntrantRegistry) -> Table {
    let mut table = Table::default()
        .with_cols(cols(2, 10))
        .with_row(header(&[
            "Entrant",
            "Name",
            "Win",
            "95% win",
            "MC win",
            "Bayes win",
            "E[pos]",
            "95% pos",
            "Reliability",
            "Uncertainty",
            "Evidence",
            "Convergence",
        ]));
    for estimate in &prediction.estimates {
        let name = registry.name(&estimate.entrant);
        let name = if estimate.default_prior {
            format!("{name}*")
        } else {
            name.to_string()
        };
        table.push_row(Row::new(
            Styles::default(),
            vec![
                estimate.entrant.to_string().into(),
                name.into(),
                format!("{:.6}", estimate.win_probability).into(),
                format!("{:.4}", estimate.win_interval_95).into(),
                format!("{:.6}", estimate.monte_carlo_win_probability).into(),
                format!("{:.6}", estimate.bayesian_win_probability).into(),
                format!("{:.3}", estimate.expected_position).into(),
                format!("{:.2}", estimate.position_interval_95).into(),
                format!("{:.3}", estimate.expected_reliability).into(),
                format!("{:.3}", estimate.uncertainty).into(),
                format!("{:.3}", estimate.evidence_strength).into(),
                format!("{:.3}", estimate.convergence).into(),
            ],
        ));
    }
    table
}

pub fn tabulate_update(summary: &UpdateSummary) -> Table {
    Table::default()
        .with_cols(cols(1, 2))
        .with_row(header(&["Event", "Updated", "Default priors"]))
        .with_row(Row::new(
            Styles::default(),
            vec![
                summary.event_id.clone().into(),
                format!("{}", summary.updated).into(),
                format!("{}", summary.default_priors).into(),
            ],
        ))
}

pub fn tabulate_calibration(outcome: &CalibrationOutcome) -> Table {
    let mut table = Table::default()
        .with_cols(cols(1, 1))
        .with_row(header(&["Factor", "Value"]));
    for (factor, value) in &outcome.best.factors {
        table.push_row(Row::new(
            Styles::default(),
            vec![factor.clone().into(), format!("{value:.6}").into()],
        ));
    }
    for (label, value) in [
        ("baseline loss", outcome.baseline_loss.combined),
        ("best loss", outcome.best_loss.combined),
        ("log loss", outcome.best_loss.log_loss),
        ("Brier", outcome.best_loss.brier),
    ] {
        table.push_row(Row::new(
            Styles::default().with(Header(true)),
            vec![label.into(), format!("{value:.6}").into()],
        ));
    }
    table
}
