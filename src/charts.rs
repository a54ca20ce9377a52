use std::io::Cursor;

use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use image::codecs::png::PngEncoder;
use image::ImageEncoder;
use plotters::coord::cartesian::Cartesian2d;
use plotters::coord::types::{RangedCoordf64, RangedDateTime};
use plotters::coord::Shift;
use plotters::prelude::*;
use plotters::style::text_anchor::{HPos, Pos, VPos};
use plotters::style::FontStyle;

use crate::models::Session;
use crate::shape::{summary_stats, LabeledSeries};

// matplotlib's default cycle, kept so charts look like the ones the
// expedition staff already know.
const SERIES_COLORS: [RGBColor; 3] = [
    RGBColor(0x1f, 0x77, 0xb4),
    RGBColor(0xff, 0x7f, 0x0e),
    RGBColor(0x2c, 0xa0, 0x2c),
];
const BAR_COLORS: [RGBColor; 3] = [
    RGBColor(0x46, 0x82, 0xb4),
    RGBColor(0x32, 0xcd, 0x32),
    RGBColor(0xff, 0x69, 0xb4),
];

const WIDE: (u32, u32) = (1200, 600);
const PANELS: (u32, u32) = (1200, 1000);
const BARS: (u32, u32) = (1000, 600);

static FONT_BYTES: &[u8] = include_bytes!("../assets/DejaVuSans.ttf");

/// Register the bundled font under the family name every chart style below
/// refers to. Must run once before any rendering.
pub fn register_fonts() -> anyhow::Result<()> {
    plotters::style::register_font("sans-serif", FontStyle::Normal, FONT_BYTES)
        .map_err(|_| anyhow::anyhow!("failed to register bundled chart font"))?;
    Ok(())
}

/// Title context shared by every chart: who the chart is about and, when the
/// request was scoped, which expedition.
#[derive(Debug, Clone, Copy)]
pub struct ChartScope<'a> {
    pub individual_number: &'a str,
    pub expedition_id: Option<i32>,
}

impl ChartScope<'_> {
    fn caption(&self, base: &str) -> String {
        let body = format!("{base} - participant {}", self.individual_number);
        match self.expedition_id {
            Some(id) => format!("Expedition #{id} - {body}"),
            None => body,
        }
    }
}

fn render_png<F>(size: (u32, u32), draw: F) -> anyhow::Result<Vec<u8>>
where
    F: for<'a> FnOnce(&DrawingArea<BitMapBackend<'a>, Shift>) -> anyhow::Result<()>,
{
    let (width, height) = size;
    let mut raster = vec![0u8; (width * height * 3) as usize];
    {
        let root = BitMapBackend::with_buffer(&mut raster, size).into_drawing_area();
        root.fill(&WHITE)?;
        draw(&root)?;
        root.present()?;
    }

    let mut png = Vec::new();
    PngEncoder::new(Cursor::new(&mut png))
        .write_image(&raster, width, height, image::ExtendedColorType::Rgb8)
        .context("failed to encode chart as PNG")?;
    Ok(png)
}

fn time_range(series: &[&LabeledSeries]) -> (DateTime<Utc>, DateTime<Utc>) {
    let mut min: Option<DateTime<Utc>> = None;
    let mut max: Option<DateTime<Utc>> = None;
    for s in series {
        for (at, _) in &s.points {
            min = Some(min.map_or(*at, |m| m.min(*at)));
            max = Some(max.map_or(*at, |m| m.max(*at)));
        }
    }
    let (lo, hi) = match (min, max) {
        (Some(lo), Some(hi)) => (lo, hi),
        _ => (Utc::now() - Duration::hours(1), Utc::now()),
    };
    if lo == hi {
        (lo - Duration::minutes(5), hi + Duration::minutes(5))
    } else {
        (lo, hi)
    }
}

/// Y range for filled charts: the fill always reaches down to zero, so zero
/// stays in view even when every sample is positive.
fn value_range(series: &[&LabeledSeries], floor: Option<f64>) -> (f64, f64) {
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for s in series {
        for &(_, v) in &s.points {
            min = min.min(v);
            max = max.max(v);
        }
    }
    if !min.is_finite() || !max.is_finite() {
        return (0.0, 1.0);
    }
    if let Some(floor) = floor {
        min = min.min(floor);
    }
    let span = (max - min).abs().max(1e-6);
    (min - span * 0.05, max + span * 0.10)
}

fn label_font() -> TextStyle<'static> {
    TextStyle::from(("sans-serif", 15)).color(&BLACK)
}

/// Grouped bar chart of per-session means for the three classic EEG bands.
/// Sessions with no data simply have no bars; the category axis still shows
/// all three labels in the fixed morning/day/evening order.
pub fn session_average_bars(
    bands: &[(&str, std::collections::BTreeMap<Session, f64>)],
    scope: &ChartScope,
) -> anyhow::Result<Vec<u8>> {
    let y_max = bands
        .iter()
        .flat_map(|(_, means)| means.values().copied())
        .fold(f64::NEG_INFINITY, f64::max);
    let y_max = if y_max.is_finite() { y_max * 1.2 } else { 1.0 };

    let caption = scope.caption("Mean EEG band amplitude by session");
    render_png(BARS, move |root| {
        let mut chart = ChartBuilder::on(root)
            .caption(caption, ("sans-serif", 24))
            .margin(15)
            .x_label_area_size(45)
            .y_label_area_size(60)
            .build_cartesian_2d(0f64..3f64, 0f64..y_max)?;

        chart
            .configure_mesh()
            .disable_x_mesh()
            .x_labels(0)
            .y_desc("Mean amplitude")
            .axis_desc_style(("sans-serif", 17))
            .label_style(("sans-serif", 14))
            .draw()?;

        let group_width = 0.75;
        let bar_width = group_width / bands.len() as f64;

        for (band_idx, (label, means)) in bands.iter().enumerate() {
            let color = BAR_COLORS[band_idx % BAR_COLORS.len()];
            let bars = Session::ALL.iter().enumerate().filter_map(|(si, session)| {
                means.get(session).map(|&mean| {
                    let x0 = si as f64 + (1.0 - group_width) / 2.0 + band_idx as f64 * bar_width;
                    Rectangle::new([(x0, 0.0), (x0 + bar_width, mean)], color.filled())
                })
            });
            chart
                .draw_series(bars)?
                .label(*label)
                .legend(move |(x, y)| {
                    Rectangle::new([(x, y - 6), (x + 12, y + 6)], color.filled())
                });

            // value labels above each bar, matching the original report style
            let value_style = TextStyle::from(("sans-serif", 13))
                .color(&BLACK)
                .pos(Pos::new(HPos::Center, VPos::Bottom));
            chart.draw_series(Session::ALL.iter().enumerate().filter_map(
                |(si, session)| {
                    means.get(session).map(|&mean| {
                        let x = si as f64
                            + (1.0 - group_width) / 2.0
                            + (band_idx as f64 + 0.5) * bar_width;
                        Text::new(
                            format!("{mean:.2}"),
                            (x, mean + y_max * 0.01),
                            value_style.clone(),
                        )
                    })
                },
            ))?;
        }

        // category labels under the axis
        let session_style = TextStyle::from(("sans-serif", 16))
            .color(&BLACK)
            .pos(Pos::new(HPos::Center, VPos::Top));
        for (si, session) in Session::ALL.iter().enumerate() {
            let (px, py) = chart.plotting_area().map_coordinate(&(si as f64 + 0.5, 0.0));
            root.draw(&Text::new(
                session.label().to_string(),
                (px, py + 8),
                session_style.clone(),
            ))?;
        }

        chart
            .configure_series_labels()
            .position(SeriesLabelPosition::UpperRight)
            .background_style(WHITE.mix(0.85))
            .border_style(BLACK.mix(0.4))
            .label_font(("sans-serif", 15))
            .draw()?;

        Ok(())
    })
}

fn draw_filled_line<DB: DrawingBackend>(
    chart: &mut ChartContext<'_, DB, Cartesian2d<RangedDateTime<DateTime<Utc>>, RangedCoordf64>>,
    series: &LabeledSeries,
    color: RGBColor,
    fill: bool,
) -> anyhow::Result<()>
where
    DB::ErrorType: 'static,
{
    if fill {
        chart.draw_series(AreaSeries::new(
            series.points.iter().copied(),
            0.0,
            color.mix(0.3),
        ))?;
    }
    chart
        .draw_series(LineSeries::new(
            series.points.iter().copied(),
            color.stroke_width(2),
        ))?
        .label(series.label.clone())
        .legend(move |(x, y)| {
            PathElement::new(vec![(x, y), (x + 18, y)], color.stroke_width(2))
        });
    chart.draw_series(
        series
            .points
            .iter()
            .map(|&(at, v)| Circle::new((at, v), 3, color.filled())),
    )?;
    Ok(())
}

fn finish_legend<'a, DB: DrawingBackend + 'a>(
    chart: &mut ChartContext<'a, DB, Cartesian2d<RangedDateTime<DateTime<Utc>>, RangedCoordf64>>,
) -> anyhow::Result<()>
where
    DB::ErrorType: 'static,
{
    chart
        .configure_series_labels()
        .position(SeriesLabelPosition::UpperRight)
        .background_style(WHITE.mix(0.85))
        .border_style(BLACK.mix(0.4))
        .label_font(("sans-serif", 15))
        .draw()?;
    Ok(())
}

/// One axis, one or more labeled time series. Covers the fatigue,
/// fatigue-vs-stress, gravity, concentration and relaxation views; the first
/// series gets an area fill when `fill_first` is set.
pub fn overlay_chart(
    series: &[LabeledSeries],
    base_title: &str,
    y_desc: &str,
    fill_first: bool,
    scope: &ChartScope,
) -> anyhow::Result<Vec<u8>> {
    let refs: Vec<&LabeledSeries> = series.iter().collect();
    let (t0, t1) = time_range(&refs);
    let floor = if fill_first { Some(0.0) } else { None };
    let (y0, y1) = value_range(&refs, floor);
    let caption = scope.caption(base_title);

    render_png(WIDE, move |root| {
        let mut chart = ChartBuilder::on(root)
            .caption(caption, ("sans-serif", 24))
            .margin(15)
            .x_label_area_size(45)
            .y_label_area_size(60)
            .build_cartesian_2d(t0..t1, y0..y1)?;

        chart
            .configure_mesh()
            .x_desc("Time")
            .y_desc(y_desc)
            .x_label_formatter(&|t: &DateTime<Utc>| t.format("%d %b %H:%M").to_string())
            .axis_desc_style(("sans-serif", 17))
            .label_style(("sans-serif", 14))
            .draw()?;

        for (idx, s) in series.iter().enumerate() {
            let color = SERIES_COLORS[idx % SERIES_COLORS.len()];
            draw_filled_line(&mut chart, s, color, fill_first && idx == 0)?;
        }

        finish_legend(&mut chart)?;
        Ok(())
    })
}

/// Three stacked panels, one per EEG band, each with an area-filled series
/// and a horizontal mean reference line.
pub fn band_panels(bands: &[LabeledSeries], scope: &ChartScope) -> anyhow::Result<Vec<u8>> {
    let refs: Vec<&LabeledSeries> = bands.iter().collect();
    let (t0, t1) = time_range(&refs);
    let caption = scope.caption("Brain activity: alpha, beta, theta");
    let bands = bands.to_vec();

    render_png(PANELS, move |root| {
        let (title_area, plot_area) = root.split_vertically(40);
        title_area.draw(&Text::new(
            caption,
            (20, 10),
            TextStyle::from(("sans-serif", 24)).color(&BLACK),
        ))?;

        let panels = plot_area.split_evenly((bands.len(), 1));
        for (idx, (panel, band)) in panels.iter().zip(bands.iter()).enumerate() {
            let color = SERIES_COLORS[idx % SERIES_COLORS.len()];
            let (y0, y1) = value_range(&[band], Some(0.0));
            let last_panel = idx + 1 == bands.len();

            let mut chart = ChartBuilder::on(panel)
                .margin(10)
                .x_label_area_size(if last_panel { 45 } else { 20 })
                .y_label_area_size(60)
                .build_cartesian_2d(t0..t1, y0..y1)?;

            let time_labels = |t: &DateTime<Utc>| t.format("%d %b %H:%M").to_string();
            let mut mesh = chart.configure_mesh();
            mesh.y_desc(band.label.clone())
                .x_label_formatter(&time_labels)
                .axis_desc_style(("sans-serif", 17))
                .label_style(("sans-serif", 14));
            if last_panel {
                mesh.x_desc("Time");
            } else {
                mesh.x_labels(0);
            }
            mesh.draw()?;

            draw_filled_line(&mut chart, band, color, true)?;

            if let Some(stats) = summary_stats(
                &band.points.iter().map(|&(_, v)| v).collect::<Vec<f64>>(),
            ) {
                chart.draw_series(std::iter::once(PathElement::new(
                    vec![(t0, stats.mean), (t1, stats.mean)],
                    color.mix(0.5).stroke_width(1),
                )))?;
            }
        }

        Ok(())
    })
}

/// Heart rate over time with the 60/100 bpm reference lines and a
/// min/mean/max summary box.
pub fn heart_rate_chart(series: &LabeledSeries, scope: &ChartScope) -> anyhow::Result<Vec<u8>> {
    let (t0, t1) = time_range(&[series]);
    let (y0, mut y1) = value_range(&[series], Some(0.0));
    // keep both reference lines in view
    y1 = y1.max(105.0);
    let caption = scope.caption("Heart rate");
    let series = series.clone();

    render_png(WIDE, move |root| {
        let mut chart = ChartBuilder::on(root)
            .caption(caption, ("sans-serif", 24))
            .margin(15)
            .x_label_area_size(45)
            .y_label_area_size(60)
            .build_cartesian_2d(t0..t1, y0..y1)?;

        chart
            .configure_mesh()
            .x_desc("Time")
            .y_desc("Heart rate (bpm)")
            .x_label_formatter(&|t: &DateTime<Utc>| t.format("%d %b %H:%M").to_string())
            .axis_desc_style(("sans-serif", 17))
            .label_style(("sans-serif", 14))
            .draw()?;

        draw_filled_line(&mut chart, &series, SERIES_COLORS[0], true)?;

        let normal = RGBColor(0x2e, 0x8b, 0x57);
        let tachy = RGBColor(0xd6, 0x27, 0x28);
        chart
            .draw_series(std::iter::once(PathElement::new(
                vec![(t0, 60.0), (t1, 60.0)],
                normal.mix(0.6).stroke_width(2),
            )))?
            .label("Normal (60)")
            .legend(move |(x, y)| {
                PathElement::new(vec![(x, y), (x + 18, y)], normal.stroke_width(2))
            });
        chart
            .draw_series(std::iter::once(PathElement::new(
                vec![(t0, 100.0), (t1, 100.0)],
                tachy.mix(0.6).stroke_width(2),
            )))?
            .label("Tachycardia (100)")
            .legend(move |(x, y)| {
                PathElement::new(vec![(x, y), (x + 18, y)], tachy.stroke_width(2))
            });

        finish_legend(&mut chart)?;

        let values: Vec<f64> = series.points.iter().map(|&(_, v)| v).collect();
        if let Some(stats) = summary_stats(&values) {
            let lines = [
                format!("Min: {:.1}", stats.min),
                format!("Mean: {:.1}", stats.mean),
                format!("Max: {:.1}", stats.max),
            ];
            for (i, line) in lines.iter().enumerate() {
                root.draw(&Text::new(
                    line.clone(),
                    (80, 70 + i as i32 * 20),
                    label_font(),
                ))?;
            }
        }

        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::time_points;
    use std::collections::BTreeMap;
    use std::sync::Once;

    static FONTS: Once = Once::new();

    fn setup() {
        FONTS.call_once(|| register_fonts().expect("font registration"));
    }

    fn scope() -> ChartScope<'static> {
        ChartScope {
            individual_number: "P-001",
            expedition_id: Some(7),
        }
    }

    fn sample_series(label: &str, values: &[f64]) -> LabeledSeries {
        let rows: Vec<(i64, f64)> = values
            .iter()
            .enumerate()
            .map(|(i, &v)| (1_706_770_800_000 + i as i64 * 300_000, v))
            .collect();
        LabeledSeries::new(label, time_points(&rows, |r| r.0, |r| r.1))
    }

    fn assert_png(bytes: &[u8]) {
        assert!(bytes.len() > 8);
        assert_eq!(bytes[..8], *b"\x89PNG\r\n\x1a\n");
    }

    #[test]
    fn caption_includes_participant_and_expedition_prefix() {
        let with = scope().caption("Heart rate");
        assert_eq!(with, "Expedition #7 - Heart rate - participant P-001");

        let without = ChartScope {
            individual_number: "P-002",
            expedition_id: None,
        }
        .caption("Heart rate");
        assert_eq!(without, "Heart rate - participant P-002");
    }

    #[test]
    fn session_bars_render_with_a_missing_session() {
        setup();
        let mut morning_day = BTreeMap::new();
        morning_day.insert(Session::Morning, 3.0);
        morning_day.insert(Session::Day, 10.0);
        // evening intentionally absent

        let bands = vec![
            ("Alpha", morning_day.clone()),
            ("Beta", morning_day.clone()),
            ("Theta", morning_day),
        ];
        let png = session_average_bars(&bands, &scope()).unwrap();
        assert_png(&png);
    }

    #[test]
    fn overlay_renders_single_and_double_series() {
        setup();
        let one = overlay_chart(
            &[sample_series("Fatigue (physiological)", &[0.2, 0.4, 0.5])],
            "Fatigue over time",
            "Fatigue level",
            false,
            &scope(),
        )
        .unwrap();
        assert_png(&one);

        let two = overlay_chart(
            &[
                sample_series("Fatigue (physiological)", &[0.2, 0.4, 0.5]),
                sample_series("Fatigue (productivity)", &[0.3, 0.3, 0.6]),
            ],
            "Fatigue over time",
            "Fatigue level",
            false,
            &scope(),
        )
        .unwrap();
        assert_png(&two);
    }

    #[test]
    fn band_panels_render() {
        setup();
        let bands = vec![
            sample_series("Alpha", &[8.0, 8.5, 9.0]),
            sample_series("Beta", &[14.0, 13.5, 13.0]),
            sample_series("Theta", &[5.0, 5.2, 5.4]),
        ];
        let png = band_panels(&bands, &scope()).unwrap();
        assert_png(&png);
    }

    #[test]
    fn heart_rate_chart_renders_with_reference_lines() {
        setup();
        let png = heart_rate_chart(
            &sample_series("Heart rate", &[58.0, 72.0, 110.0]),
            &scope(),
        )
        .unwrap();
        assert_png(&png);
    }

    #[test]
    fn single_point_series_still_renders() {
        setup();
        let png = overlay_chart(
            &[sample_series("Gravity", &[0.9])],
            "Gravity over time",
            "Gravity",
            true,
            &scope(),
        )
        .unwrap();
        assert_png(&png);
    }
}
