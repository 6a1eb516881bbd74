//! Integration tests for purs-install

#[cfg(unix)]
mod workflow;

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use tempfile::TempDir;

    fn purs_install() -> Command {
        cargo_bin_cmd!("purs-install")
    }

    #[test]
    fn help_displays() {
        purs_install()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("install the PureScript compiler"));
    }

    #[test]
    fn version_displays() {
        purs_install()
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("purs-install"));
    }

    #[test]
    fn install_help_lists_flags() {
        purs_install()
            .args(["install", "--help"])
            .assert()
            .success()
            .stdout(predicate::str::contains("--purs-ver"))
            .stdout(predicate::str::contains("--header"));
    }

    #[test]
    fn config_path() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        purs_install()
            .args(["config", "path"])
            .env("PURS_INSTALL_CONFIG", &path)
            .assert()
            .success()
            .stdout(predicate::str::contains("config.toml"));
    }

    #[test]
    fn config_show() {
        let temp = TempDir::new().unwrap();
        purs_install()
            .args(["config", "show"])
            .env("PURS_INSTALL_CONFIG", temp.path().join("config.toml"))
            .assert()
            .success()
            .stdout(predicate::str::contains("[general]"));
    }

    #[test]
    fn config_set_then_show() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        purs_install()
            .args(["config", "set", "install.version", "0.15.10"])
            .env("PURS_INSTALL_CONFIG", &path)
            .assert()
            .success();

        purs_install()
            .args(["config", "show"])
            .env("PURS_INSTALL_CONFIG", &path)
            .assert()
            .success()
            .stdout(predicate::str::contains("0.15.10"));
    }

    #[test]
    fn config_set_unknown_key() {
        let temp = TempDir::new().unwrap();
        purs_install()
            .args(["config", "set", "install.colour", "blue"])
            .env("PURS_INSTALL_CONFIG", temp.path().join("config.toml"))
            .assert()
            .failure()
            .stderr(predicate::str::contains("install.colour"));
    }

    #[test]
    fn broken_config_reported() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "[install\n").unwrap();
        purs_install()
            .args(["cache", "info"])
            .env("PURS_INSTALL_CONFIG", &path)
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid configuration"));
    }

    #[test]
    fn cache_info_empty() {
        let temp = TempDir::new().unwrap();
        purs_install()
            .args(["cache", "info"])
            .env("PURS_INSTALL_CONFIG", temp.path().join("config.toml"))
            .env("PURS_INSTALL_CACHE_DIR", temp.path().join("cache"))
            .assert()
            .success()
            .stdout(predicate::str::contains("No cached binaries"));
    }

    #[test]
    fn cache_info_json() {
        let temp = TempDir::new().unwrap();
        purs_install()
            .args(["cache", "info", "--format", "json"])
            .env("PURS_INSTALL_CONFIG", temp.path().join("config.toml"))
            .env("PURS_INSTALL_CACHE_DIR", temp.path().join("cache"))
            .assert()
            .success()
            .stdout(predicate::str::contains("\"entries\": []"));
    }

    #[test]
    fn cache_clear_empty() {
        let temp = TempDir::new().unwrap();
        purs_install()
            .args(["cache", "clear", "--yes"])
            .env("PURS_INSTALL_CONFIG", temp.path().join("config.toml"))
            .env("PURS_INSTALL_CACHE_DIR", temp.path().join("cache"))
            .assert()
            .success()
            .stdout(predicate::str::contains("already empty"));
    }

    #[test]
    fn invalid_version_rejected() {
        let temp = TempDir::new().unwrap();
        purs_install()
            .args(["install", "--purs-ver", "latest", "--dir"])
            .arg(temp.path())
            .env("PURS_INSTALL_CONFIG", temp.path().join("config.toml"))
            .env("PURS_INSTALL_CACHE_DIR", temp.path().join("cache"))
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid option"));
    }

    #[test]
    fn reserved_stack_flag_rejected() {
        let temp = TempDir::new().unwrap();
        purs_install()
            .args(["install", "--dir"])
            .arg(temp.path())
            .args(["--", "--local-bin-path=/tmp"])
            .env("PURS_INSTALL_CONFIG", temp.path().join("config.toml"))
            .env("PURS_INSTALL_CACHE_DIR", temp.path().join("cache"))
            .assert()
            .failure()
            .stderr(predicate::str::contains("--local-bin-path"));
    }

    #[test]
    fn completions_generate() {
        purs_install()
            .args(["completions", "bash"])
            .assert()
            .success()
            .stdout(predicate::str::contains("purs-install"));
    }
}
