//! Utilities for terminal output during scanning.

/// Terminal User Interface Module for netsweep
/// Defines macros to use
#[macro_export]
macro_rules! warning {
    ($name:expr) => {{
        use ::colored::Colorize;
        eprintln!("{} {}", "[!]".red().bold(), $name);
    }};
    ($name:expr, $greppable:expr, $accessible:expr) => {{
        use ::colored::Colorize;
        // if not greppable then print, otherwise no else statement so do not print.
        if !$greppable {
            if $accessible {
                eprintln!("{}", $name);
            } else {
                eprintln!("{} {}", "[!]".red().bold(), $name);
            }
        }
    }};
}

#[macro_export]
macro_rules! detail {
    ($name:expr) => {{
        use ::colored::Colorize;
        println!("{} {}", "[~]".blue().bold(), $name);
    }};
    ($name:expr, $greppable:expr, $accessible:expr) => {{
        use ::colored::Colorize;
        if !$greppable {
            if $accessible {
                println!("{}", $name);
            } else {
                println!("{} {}", "[~]".blue().bold(), $name);
            }
        }
    }};
}

#[macro_export]
macro_rules! output {
    ($name:expr) => {{
        use ::colored::Colorize;
        println!("{} {}", "[>]".green().bold(), $name);
    }};
    ($name:expr, $greppable:expr, $accessible:expr) => {{
        use ::colored::Colorize;
        if !$greppable {
            if $accessible {
                println!("{}", $name);
            } else {
                println!("{} {}", "[>]".green().bold(), $name);
            }
        }
    }};
}

/// Banner printed once at startup unless output is greppable or accessible.
#[macro_export]
macro_rules! opening {
    () => {{
        use ::colored::Colorize;
        let banner = "netsweep :: find the hosts, knock on the ports";
        println!("{}", banner.cyan().bold());
    }};
}
