mod dashboard;
mod helpers;
mod profile;
mod steps;
mod water;

pub(crate) use dashboard::cmd_dashboard;
pub(crate) use profile::{
    cmd_goals_set, cmd_goals_show, cmd_init, cmd_profile_set, cmd_profile_show,
};
pub(crate) use steps::{cmd_steps_sample, cmd_steps_today, cmd_steps_watch, cmd_steps_week};
pub(crate) use water::{cmd_water_add, cmd_water_presets, cmd_water_today, cmd_water_week};
