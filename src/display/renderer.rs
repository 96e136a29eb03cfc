// 终端渲染
// 每次刷新整帧重绘，表格水平居中

use std::io;

use ratatui::backend::Backend;
use ratatui::layout::{Alignment, Constraint, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::widgets::{Block, Cell, Paragraph, Row, Table};
use ratatui::{Frame, Terminal};
use tracing::trace;

use super::table::{GpuTable, TableRow, TableView, HEADERS};
use crate::models::Snapshot;

const COLUMN_SPACING: u16 = 1;
const TITLE: &str = "GPU Status";
const FAREWELL: &str = "Goodbye! 👋";

/// 表格显示器
pub struct TableDisplay<B: Backend> {
    terminal: Terminal<B>,
    table: GpuTable,
    farewell_shown: bool,
}

impl<B: Backend> TableDisplay<B> {
    pub fn new(terminal: Terminal<B>) -> Self {
        Self {
            terminal,
            table: GpuTable::new(),
            farewell_shown: false,
        }
    }

    /// 绘制一帧
    pub fn render(&mut self, snapshot: &Snapshot) -> io::Result<()> {
        let view = self.table.update(snapshot);
        trace!("[Display] Rendering {} rows", view.rows.len());
        self.terminal.draw(|frame| draw_table(frame, &view))?;
        Ok(())
    }

    /// 显示告别面板（只显示一次）
    pub fn show_farewell(&mut self) -> io::Result<()> {
        if self.farewell_shown {
            return Ok(());
        }
        self.farewell_shown = true;
        self.terminal.draw(draw_farewell)?;
        Ok(())
    }

    /// 恢复光标
    pub fn restore(&mut self) -> io::Result<()> {
        self.terminal.show_cursor()
    }

    #[cfg(test)]
    pub fn terminal(&self) -> &Terminal<B> {
        &self.terminal
    }
}

fn draw_table(frame: &mut Frame, view: &TableView) {
    let widths = view.widths.as_array();
    let area = centered(
        frame.area(),
        view.widths.total_width(COLUMN_SPACING),
        u16::try_from(view.rows.len())
            .unwrap_or(u16::MAX)
            .saturating_add(3),
    );

    let header = Row::new(HEADERS.iter().map(|h| Cell::from(*h))).style(
        Style::default()
            .fg(Color::Magenta)
            .add_modifier(Modifier::BOLD),
    );
    let rows = view.rows.iter().map(table_row);

    let table = Table::new(rows, widths.iter().map(|w| Constraint::Length(*w)))
        .header(header)
        .column_spacing(COLUMN_SPACING)
        .block(
            Block::bordered()
                .title(TITLE)
                .title_alignment(Alignment::Center)
                .border_style(Style::default().fg(Color::Blue)),
        );

    frame.render_widget(table, area);
}

fn table_row(row: &TableRow) -> Row<'_> {
    let cells = row.cells.iter().enumerate().map(|(i, value)| {
        let style = match (i, row.is_status, value.as_str()) {
            (1, true, _) => Style::default().fg(Color::Yellow),
            (2, false, "True") => Style::default().fg(Color::Green),
            (2, false, _) => Style::default().fg(Color::Red),
            (0, _, _) => Style::default().fg(Color::Cyan),
            _ => Style::default(),
        };
        Cell::from(value.as_str()).style(style)
    });
    Row::new(cells)
}

fn draw_farewell(frame: &mut Frame) {
    let area = centered(frame.area(), 30, 3);
    let panel = Paragraph::new(FAREWELL)
        .alignment(Alignment::Center)
        .style(Style::default().fg(Color::Green).add_modifier(Modifier::BOLD))
        .block(Block::bordered().border_style(Style::default().fg(Color::Blue)));
    frame.render_widget(panel, area);
}

/// 在区域内水平居中，超出时裁剪
fn centered(area: Rect, width: u16, height: u16) -> Rect {
    let width = width.min(area.width);
    let height = height.min(area.height);
    Rect {
        x: area.x + (area.width - width) / 2,
        y: area.y,
        width,
        height,
    }
}
