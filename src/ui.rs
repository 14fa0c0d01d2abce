use ratatui::{
    buffer::Buffer,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Widget},
    Frame,
};

use crate::app::App;
use crate::braille::BrailleCanvas;
use crate::map::MapLayers;

pub fn render(frame: &mut Frame, app: &mut App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(3), Constraint::Length(1)])
        .split(frame.area());

    render_map(frame, app, chunks[0]);
    render_status_bar(frame, app, chunks[1]);
}

fn render_map(frame: &mut Frame, app: &mut App, area: Rect) {
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray))
        .title(Span::styled(
            " Globe Tiles ",
            Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
        ));

    let inner = block.inner(area);
    frame.render_widget(block, area);

    let layers = app.draw_map(inner.width, inner.height);
    let cursor = app.mouse_pos.and_then(|(col, row)| {
        let (cx, cy) = (col.checked_sub(inner.x)?, row.checked_sub(inner.y)?);
        (cx < inner.width && cy < inner.height).then_some((cx, cy))
    });

    frame.render_widget(MapWidget { layers, cursor }, inner);
}

/// Braille layers stacked back to front, with the cursor on top.
struct MapWidget {
    layers: MapLayers,
    cursor: Option<(u16, u16)>,
}

fn render_layer(canvas: &BrailleCanvas, color: Color, area: Rect, buf: &mut Buffer) {
    for row in 0..canvas.height().min(usize::from(area.height)) {
        let y = area.y + row as u16;
        for (col, ch) in canvas.row(row).enumerate().take(usize::from(area.width)) {
            if ch != '\u{2800}' {
                buf[(area.x + col as u16, y)].set_char(ch).set_fg(color);
            }
        }
    }
}

impl Widget for MapWidget {
    fn render(self, area: Rect, buf: &mut Buffer) {
        render_layer(&self.layers.graticule, Color::DarkGray, area, buf);
        render_layer(&self.layers.wireframe, Color::Blue, area, buf);
        render_layer(&self.layers.land, Color::Green, area, buf);
        render_layer(&self.layers.coastlines, Color::Cyan, area, buf);

        if let Some((cx, cy)) = self.cursor {
            buf[(area.x + cx, area.y + cy)].set_char('╋').set_fg(Color::Red);
        }
    }
}

fn toggle_span(label: &'static str, on: bool) -> Span<'static> {
    Span::styled(
        label,
        Style::default().fg(if on { Color::Green } else { Color::DarkGray }),
    )
}

fn render_status_bar(frame: &mut Frame, app: &App, area: Rect) {
    let dim = Style::default().fg(Color::DarkGray);
    let globeness = app.projection.globeness();

    let mut spans = vec![
        Span::styled(format!(" {} ", app.projection_label()), Style::default().fg(Color::Magenta)),
        Span::styled(format!("{globeness:.2} "), Style::default().fg(Color::Magenta)),
        Span::styled("z", dim),
        Span::styled(format!("{:.1} ", app.transform.zoom), Style::default().fg(Color::Yellow)),
        Span::styled(app.center_coords(), Style::default().fg(Color::Cyan)),
        Span::styled(" | ", dim),
    ];

    if let Some((micro_degrees, state)) = app.error_loop_status() {
        spans.push(Span::styled("Δlat ", dim));
        spans.push(Span::styled(
            format!("{micro_degrees:+.1}µ° {state} "),
            Style::default().fg(Color::Yellow),
        ));
    }
    spans.push(Span::styled(format!("meshes {} ", app.cached_meshes()), dim));

    let settings = &app.map_renderer.settings;
    spans.push(toggle_span("[w]ire ", settings.show_wireframe));
    spans.push(toggle_span("[t]grid ", settings.show_graticule));
    spans.push(Span::styled(
        "| hjkl:pan +/-:zoom []:pitch ,.:bearing g:globe r:reset q:quit",
        dim,
    ));

    frame.render_widget(Paragraph::new(Line::from(spans)), area);
}
