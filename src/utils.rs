use clap::builder::{
    styling::{AnsiColor, Effects},
    Styles,
};

pub mod parsers;

pub use parsers::{extract_job_id, format_wall_time, parse_wall_time};

pub const STYLES: Styles = Styles::styled()
    .header(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .usage(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .literal(AnsiColor::Cyan.on_default().effects(Effects::BOLD))
    .placeholder(AnsiColor::Cyan.on_default());
