use std::collections::HashMap;

use plotters::{
    coord::Shift,
    prelude::*,
    style::text_anchor::{HPos, Pos, VPos},
};

use crate::{
    config::ImpactDesign, delta::CrossImpact, metrics::ThroughputMetric, report::MetricValues,
    resources::ResourceSeries,
};

/// Width of a single bar in chart coordinates; groups are one unit apart
static BAR_WIDTH: f64 = 0.35;

/// Height of the chart title as a share of the drawing area
static TITLE_HEIGHT_PERCENT: f64 = 8.;

static REFERENCE_COLOR: RGBColor = RGBColor(46, 204, 113);
static TREATMENT_COLOR: RGBColor = RGBColor(231, 76, 60);
static DARK_RED: RGBColor = RGBColor(139, 0, 0);
static DARK_GREEN: RGBColor = RGBColor(0, 100, 0);
static LABEL_BACKGROUND: RGBColor = RGBColor(255, 255, 153);

/// Pixel size of the gap annotation text
static GAP_FONT_SIZE: i32 = 13;

/// One panel of the impact chart
pub struct ImpactPanel<'a> {
    pub metric: &'a ThroughputMetric,
    pub values: MetricValues,
    pub impact: Option<CrossImpact>,
}

/// Draw a 2x2 grid of bar charts comparing reference and treatment with the
/// design's dimension on and off
pub fn draw_impact_chart<DB>(
    root: &DrawingArea<DB, Shift>,
    design: &ImpactDesign,
    panels: &[ImpactPanel],
) -> eyre::Result<()>
where
    DB: DrawingBackend,
    DB::ErrorType: 'static,
{
    root.fill(&WHITE)?;

    let (title_area, grid_area) = root.split_vertically(TITLE_HEIGHT_PERCENT.percent_height());
    title_area.draw_text(
        &format!(
            "{} Impact on Throughput Metrics: {} vs {}",
            design.dimension_label, design.reference_label, design.treatment_label
        ),
        &TextStyle::from(
            ("sans-serif", title_area.relative_to_height(0.5))
                .into_font()
                .color(&BLACK),
        ),
        (10, 5),
    )?;

    let rows = (panels.len() + 1) / 2;
    let areas = grid_area.split_evenly((rows.max(1), 2));
    for (panel, area) in panels.iter().zip(areas.iter()) {
        draw_impact_panel(area, design, panel)?;
    }

    Ok(())
}

fn draw_impact_panel<DB>(
    area: &DrawingArea<DB, Shift>,
    design: &ImpactDesign,
    panel: &ImpactPanel,
) -> eyre::Result<()>
where
    DB: DrawingBackend,
    DB::ErrorType: 'static,
{
    let values = &panel.values;
    // (label, reference, treatment, delta) for each level of the dimension
    let groups = [
        (
            format!("WITH {}", design.dimension_label),
            values.reference_on,
            values.treatment_on,
            panel.impact.map(|x| x.b),
        ),
        (
            format!("W/O {}", design.dimension_label),
            values.reference_off,
            values.treatment_off,
            panel.impact.map(|x| x.a),
        ),
    ];

    let all_values = [
        values.reference_on,
        values.reference_off,
        values.treatment_on,
        values.treatment_off,
    ];
    let (y_min, y_max) = bar_range(&all_values);

    let mut chart = ChartBuilder::on(area)
        .caption(panel.metric.title, ("sans-serif", 22))
        .set_label_area_size(LabelAreaPosition::Left, 70)
        .set_label_area_size(LabelAreaPosition::Bottom, 40)
        .margin(15)
        .build_cartesian_2d(-0.5f64..1.5f64, y_min..y_max)?;

    let decimals = tick_decimals(y_max.max(-y_min));
    let y_formatter = |y: &f64| format!("{:.*}", decimals, y);
    let x_formatter = |x: &f64| group_label(*x, &groups).unwrap_or_default();

    chart
        .configure_mesh()
        .disable_x_mesh()
        .light_line_style(&TRANSPARENT)
        .axis_desc_style(("sans-serif", 15))
        .y_desc(panel.metric.unit_label)
        .x_labels(5)
        .x_label_formatter(&x_formatter)
        .y_label_formatter(&y_formatter)
        .draw()?;

    let bar = |center: f64, offset: f64, value: f64| {
        let left = center + offset;
        [(left, 0f64), (left + BAR_WIDTH, value)]
    };

    chart
        .draw_series(groups.iter().enumerate().map(|(i, group)| {
            Rectangle::new(bar(i as f64, -BAR_WIDTH, group.1), REFERENCE_COLOR.mix(0.85).filled())
        }))?
        .label(design.reference_label.as_str())
        .legend(|(x, y)| Rectangle::new([(x, y - 5), (x + 15, y + 5)], REFERENCE_COLOR.filled()));

    chart
        .draw_series(groups.iter().enumerate().map(|(i, group)| {
            Rectangle::new(bar(i as f64, 0., group.2), TREATMENT_COLOR.mix(0.85).filled())
        }))?
        .label(design.treatment_label.as_str())
        .legend(|(x, y)| Rectangle::new([(x, y - 5), (x + 15, y + 5)], TREATMENT_COLOR.filled()));

    // Bar outlines
    chart.draw_series(groups.iter().enumerate().flat_map(|(i, group)| {
        let x = i as f64;
        vec![
            Rectangle::new(bar(x, -BAR_WIDTH, group.1), BLACK.stroke_width(2)),
            Rectangle::new(bar(x, 0., group.2), BLACK.stroke_width(2)),
        ]
    }))?;

    // Value labels above each bar
    let value_style = TextStyle::from(("sans-serif", 13).into_font())
        .color(&BLACK)
        .pos(Pos::new(HPos::Center, VPos::Bottom));
    chart.draw_series(groups.iter().enumerate().flat_map(|(i, group)| {
        let x = i as f64;
        vec![
            Text::new(
                format!("{:.1}", group.1),
                (x - BAR_WIDTH / 2., group.1),
                value_style.clone(),
            ),
            Text::new(
                format!("{:.1}", group.2),
                (x + BAR_WIDTH / 2., group.2),
                value_style.clone(),
            ),
        ]
    }))?;

    // Connect reference and treatment and label the gap
    for (i, (_, reference, treatment, delta)) in groups.iter().enumerate() {
        let delta = match delta {
            Some(delta) => delta,
            None => continue,
        };
        let x = i as f64;
        let (line_color, text_color) = gap_colors(delta.absolute_delta);

        chart.draw_series(std::iter::once(PathElement::new(
            vec![(x, *reference), (x, *treatment)],
            line_color.stroke_width(2),
        )))?;

        // Below the middle of the connector and right of it, clear of the
        // value labels which sit above the bars
        let gap = format!("{:+.1}", delta.absolute_delta);
        let pct = format!("({:+.1}%)", delta.percentage_delta);
        let width = gap.len().max(pct.len()) as i32 * GAP_FONT_SIZE * 6 / 10 + 8;
        let text_style =
            TextStyle::from(("sans-serif", GAP_FONT_SIZE).into_font()).color(&text_color);
        let middle = (reference + treatment) / 2.;
        chart.draw_series(std::iter::once(
            EmptyElement::at((x + 0.15, middle))
                + Rectangle::new(
                    [(0, 2), (width, 2 * GAP_FONT_SIZE + 12)],
                    LABEL_BACKGROUND.mix(0.6).filled(),
                )
                + Text::new(gap, (4, 4), text_style.clone())
                + Text::new(pct, (4, GAP_FONT_SIZE + 8), text_style),
        ))?;
    }

    chart
        .configure_series_labels()
        .position(SeriesLabelPosition::UpperRight)
        .background_style(&WHITE.mix(0.8))
        .border_style(&BLACK)
        .draw()?;

    Ok(())
}

/// Draw one line per pod of a resource series over its timeline
pub fn draw_resource_chart<DB>(
    root: &DrawingArea<DB, Shift>,
    series: &ResourceSeries,
) -> eyre::Result<()>
where
    DB: DrawingBackend,
    DB::ErrorType: 'static,
{
    root.fill(&WHITE)?;

    let timeline = series.timeline();
    let positions: HashMap<&str, usize> = timeline
        .iter()
        .enumerate()
        .map(|(i, &t)| (t, i))
        .collect();
    let x_max = (timeline.len().max(2) - 1) as f64;
    let (y_min, y_max) = line_range(series.value_range());

    let mut chart = ChartBuilder::on(root)
        .caption(series.title(), ("sans-serif", 28))
        .set_label_area_size(LabelAreaPosition::Left, 70)
        .set_label_area_size(LabelAreaPosition::Bottom, 40)
        .margin(20)
        .build_cartesian_2d(0f64..x_max, y_min..y_max)?;

    chart
        .configure_mesh()
        .disable_mesh()
        .axis_desc_style(("sans-serif", 18))
        .x_desc("Timestamp")
        .y_desc(series.axis_label())
        .x_label_formatter(&|_| String::new())
        .draw()?;

    for (i, (pod, samples)) in series.pods().iter().enumerate() {
        let color = Palette99::pick(i).mix(0.8);

        let mut points: Vec<(f64, f64)> = samples
            .iter()
            .filter_map(|s| {
                positions
                    .get(s.timestamp.as_str())
                    .map(|&x| (x as f64, s.value))
            })
            .collect();
        points.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

        chart
            .draw_series(LineSeries::new(points, color.stroke_width(2)))?
            .label(pod.as_str())
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color.stroke_width(2)));
    }

    if !series.pods().is_empty() {
        chart
            .configure_series_labels()
            .position(SeriesLabelPosition::UpperRight)
            .background_style(&WHITE.mix(0.8))
            .border_style(&BLACK)
            .draw()?;
    }

    Ok(())
}

/// Name of the group centered at `x`, if any
fn group_label<T>(x: f64, groups: &[(String, f64, f64, T)]) -> Option<String> {
    let index = x.round();
    if (x - index).abs() > 1e-6 || index < 0. {
        return None;
    }
    groups.get(index as usize).map(|g| g.0.clone())
}

/// Line and text color of a gap annotation
fn gap_colors(gap: f64) -> (RGBColor, RGBColor) {
    if gap < 0. {
        (RED, DARK_RED)
    } else {
        (GREEN, DARK_GREEN)
    }
}

/// Decimals of every y tick of a panel, picked once from the largest magnitude
fn tick_decimals(max: f64) -> usize {
    if max >= 100. {
        0
    } else if max >= 1. {
        1
    } else {
        3
    }
}

/// Y range of a bar chart: always includes zero, with headroom for labels
fn bar_range(values: &[f64]) -> (f64, f64) {
    let max = values.iter().copied().fold(0f64, f64::max);
    let min = values.iter().copied().fold(0f64, f64::min);
    if max == min {
        return (0., 1.);
    }
    (min * 1.15, max * 1.15)
}

/// Y range of a line chart with a small margin
fn line_range(range: Option<(f64, f64)>) -> (f64, f64) {
    match range {
        None => (0., 1.),
        Some((lo, hi)) if lo == hi => (lo - 1., hi + 1.),
        Some((lo, hi)) => {
            let margin = (hi - lo) * 0.05;
            (lo - margin, hi + margin)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_labels_only_at_centers() {
        let groups = [
            ("WITH LoRA".to_string(), 1., 2., ()),
            ("W/O LoRA".to_string(), 3., 4., ()),
        ];
        assert_eq!(group_label(0., &groups).as_deref(), Some("WITH LoRA"));
        assert_eq!(group_label(1., &groups).as_deref(), Some("W/O LoRA"));
        assert_eq!(group_label(0.5, &groups), None);
        assert_eq!(group_label(-0.5, &groups), None);
        assert_eq!(group_label(2., &groups), None);
    }

    #[test]
    fn bar_range_includes_zero() {
        let (lo, hi) = bar_range(&[100., 200.]);
        assert_eq!(lo, 0.);
        assert!((hi - 230.).abs() < 1e-9);
        assert_eq!(bar_range(&[0., 0.]), (0., 1.));
        let (lo, hi) = bar_range(&[-10., 20.]);
        assert!(lo < -10. && hi > 20.);
    }

    #[test]
    fn line_range_pads_values() {
        assert_eq!(line_range(None), (0., 1.));
        assert_eq!(line_range(Some((2., 2.))), (1., 3.));
        assert_eq!(line_range(Some((0., 100.))), (-5., 105.));
    }

    #[test]
    fn ticks_share_one_precision() {
        let decimals = tick_decimals(1150.);
        assert_eq!(decimals, 0);
        assert_eq!(format!("{:.*}", decimals, 800.), "800");
        assert_eq!(format!("{:.*}", decimals, 1000.), "1000");
        assert_eq!(tick_decimals(11.5), 1);
        assert_eq!(tick_decimals(0.2), 3);
    }

    #[test]
    fn negative_gaps_are_red() {
        assert_eq!(gap_colors(-1.).0.rgb(), RED.rgb());
        assert_eq!(gap_colors(0.).0.rgb(), GREEN.rgb());
    }
}
