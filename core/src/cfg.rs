/*
 *   Copyright (c) 2022 R3BL LLC
 *   All rights reserved.
 *
 *   Licensed under the Apache License, Version 2.0 (the "License");
 *   you may not use this file except in compliance with the License.
 *   You may obtain a copy of the License at
 *
 *   http://www.apache.org/licenses/LICENSE-2.0
 *
 *   Unless required by applicable law or agreed to in writing, software
 *   distributed under the License is distributed on an "AS IS" BASIS,
 *   WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *   See the License for the specific language governing permissions and
 *   limitations under the License.
 */

//! Pre-declared configuration table, grounded in `iw_cfg_init`/`iw_cfg.h`:
//! a controlled `ValueStore` seeded at supervisor init with these exact
//! names, defaults and criteria.

use crate::value::{criteria, ValueType};
use crate::valstore::{StoreMode, ValueStore};

pub const CMD_PORT: &str = "cfg.cmdport";
pub const FOREGROUND: &str = "cfg.foreground";
pub const FOREGROUND_OPT: &str = "cfg.foreground.opt";
pub const DAEMONIZE: &str = "cfg.daemonize";
pub const DAEMONIZE_OPT: &str = "cfg.daemonize.opt";
pub const LOGLEVEL: &str = "cfg.loglvl";
pub const LOGLEVEL_OPT: &str = "cfg.loglvl.opt";
pub const ALLOW_QUIT: &str = "cfg.allowquit";
pub const CRASHHANDLER_ENABLE: &str = "cfg.crashhandler.enable";
pub const CRASHHANDLER_FILE: &str = "cfg.crashhandler.file";
pub const MEMTRACK_ENABLE: &str = "cfg.memtrack.enable";
pub const MEMTRACK_SIZE: &str = "cfg.memtrack.size";
pub const HEALTHCHECK_ENABLE: &str = "cfg.healthcheck.enable";
pub const WEBGUI_ENABLE: &str = "cfg.webgui.enable";
pub const WEBGUI_PORT: &str = "cfg.webgui.port";
pub const WEBGUI_CSS_FILE: &str = "cfg.webgui.css_file";
pub const SYSLOG_SIZE: &str = "cfg.syslog.size";
pub const PRG_NAME: &str = "cfg.prg_name";
pub const PRG_ABOUT: &str = "cfg.prg_about";

/// Default values, named the way `iw_cfg.h`'s `IW_DEF_*` constants are.
pub mod defaults {
    pub const CMD_PORT: i32 = 10000;
    pub const FOREGROUND: i32 = 0;
    pub const FOREGROUND_OPT: &str = "f";
    pub const DAEMONIZE: i32 = 0;
    pub const DAEMONIZE_OPT: &str = "d";
    pub const LOGLEVEL: i32 = 0;
    pub const LOGLEVEL_OPT: &str = "l";
    pub const ALLOW_QUIT: i32 = 1;
    pub const CRASHHANDLER_ENABLE: i32 = 1;
    pub const CRASHHANDLER_FILE: &str = "/tmp/callstack.txt";
    pub const MEMTRACK_ENABLE: i32 = 1;
    pub const MEMTRACK_SIZE: i32 = 10000;
    pub const HEALTHCHECK_ENABLE: i32 = 1;
    pub const WEBGUI_ENABLE: i32 = 1;
    pub const WEBGUI_PORT: i32 = 8080;
    pub const WEBGUI_CSS_FILE: &str = "";
    pub const SYSLOG_SIZE: i32 = 10000;
    pub const PRG_NAME: &str = "InstaWorks";
    pub const PRG_ABOUT: &str = "";
}

/// Builds the controlled store seeded with the pre-declared table
/// (`iw_cfg_init`). Number defaults are set via `set_number` after
/// declaring each name, matching the original's "declare, then
/// ADD_NUM/ADD_STR sets the default" two-step.
pub fn build_default_store() -> ValueStore {
    let mut s = ValueStore::new(StoreMode::Controlled);

    s.add_name_regexp(CMD_PORT, "Must be between 0 and 65535", ValueType::Number, criteria::PORT, true);
    s.set_number(CMD_PORT, defaults::CMD_PORT).expect("default must validate");

    s.add_name_regexp(FOREGROUND, "Must be 0 or 1", ValueType::Number, criteria::BOOL, false);
    s.set_number(FOREGROUND, defaults::FOREGROUND).expect("default must validate");

    s.add_name_regexp(FOREGROUND_OPT, "Must be a single character", ValueType::String, criteria::CHAR, true);
    s.set_string(FOREGROUND_OPT, defaults::FOREGROUND_OPT).expect("default must validate");

    s.add_name_regexp(DAEMONIZE, "Must be 0 or 1", ValueType::Number, criteria::BOOL, false);
    s.set_number(DAEMONIZE, defaults::DAEMONIZE).expect("default must validate");

    s.add_name_regexp(DAEMONIZE_OPT, "Must be a single character", ValueType::String, criteria::CHAR, true);
    s.set_string(DAEMONIZE_OPT, defaults::DAEMONIZE_OPT).expect("default must validate");

    s.add_name(LOGLEVEL, ValueType::Number, true);
    s.set_number(LOGLEVEL, defaults::LOGLEVEL).expect("default must validate");

    s.add_name_regexp(LOGLEVEL_OPT, "Must be a single character", ValueType::String, criteria::CHAR, true);
    s.set_string(LOGLEVEL_OPT, defaults::LOGLEVEL_OPT).expect("default must validate");

    s.add_name_regexp(ALLOW_QUIT, "Must be 0 or 1", ValueType::Number, criteria::BOOL, true);
    s.set_number(ALLOW_QUIT, defaults::ALLOW_QUIT).expect("default must validate");

    s.add_name_regexp(CRASHHANDLER_ENABLE, "Must be 0 or 1", ValueType::Number, criteria::BOOL, true);
    s.set_number(CRASHHANDLER_ENABLE, defaults::CRASHHANDLER_ENABLE).expect("default must validate");

    s.add_name(CRASHHANDLER_FILE, ValueType::String, true);
    s.set_string(CRASHHANDLER_FILE, defaults::CRASHHANDLER_FILE).expect("default must validate");

    s.add_name_regexp(MEMTRACK_ENABLE, "Must be 0 or 1", ValueType::Number, criteria::BOOL, true);
    s.set_number(MEMTRACK_ENABLE, defaults::MEMTRACK_ENABLE).expect("default must validate");

    s.add_name(MEMTRACK_SIZE, ValueType::Number, true);
    s.set_number(MEMTRACK_SIZE, defaults::MEMTRACK_SIZE).expect("default must validate");

    s.add_name_regexp(HEALTHCHECK_ENABLE, "Must be 0 or 1", ValueType::Number, criteria::BOOL, true);
    s.set_number(HEALTHCHECK_ENABLE, defaults::HEALTHCHECK_ENABLE).expect("default must validate");

    s.add_name_regexp(WEBGUI_ENABLE, "Must be 0 or 1", ValueType::Number, criteria::BOOL, true);
    s.set_number(WEBGUI_ENABLE, defaults::WEBGUI_ENABLE).expect("default must validate");

    s.add_name_regexp(WEBGUI_PORT, "Must be between 0 and 65535", ValueType::Number, criteria::PORT, true);
    s.set_number(WEBGUI_PORT, defaults::WEBGUI_PORT).expect("default must validate");

    s.add_name(WEBGUI_CSS_FILE, ValueType::String, true);
    s.set_string(WEBGUI_CSS_FILE, defaults::WEBGUI_CSS_FILE).expect("default must validate");

    s.add_name(SYSLOG_SIZE, ValueType::Number, true);
    s.set_number(SYSLOG_SIZE, defaults::SYSLOG_SIZE).expect("default must validate");

    s.add_name(PRG_NAME, ValueType::String, true);
    s.set_string(PRG_NAME, defaults::PRG_NAME).expect("default must validate");

    s.add_name(PRG_ABOUT, ValueType::String, false);
    s.set_string(PRG_ABOUT, defaults::PRG_ABOUT).expect("default must validate");

    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn default_store_round_trips_cmd_port() {
        let s = build_default_store();
        assert_eq!(s.get_number(CMD_PORT), Some(defaults::CMD_PORT));
    }

    #[test]
    fn default_store_rejects_out_of_range_port() {
        let mut s = build_default_store();
        assert!(s.set_number(CMD_PORT, 70000).is_err());
    }
}
