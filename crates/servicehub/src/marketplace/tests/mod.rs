mod common;
mod reaper;
