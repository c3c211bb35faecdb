use std::fs;
use std::process::{Command, Output};
use tempfile::TempDir;

fn kiln(dir: &TempDir, args: &[&str]) -> std::io::Result<Output> {
    Command::new(env!("CARGO_BIN_EXE_kiln"))
        .args(args)
        .current_dir(dir.path())
        .output()
}

#[test]
fn test_actions_are_logged_to_stdout() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    fs::write(dir.path().join("kiln.yaml"), "title: Site\n")?;
    fs::create_dir_all(dir.path().join("static"))?;
    fs::write(dir.path().join("static/robots.txt"), "")?;
    fs::create_dir_all(dir.path().join("content/blog"))?;
    fs::write(dir.path().join("content/blog/hello.md"), "# Hi\nHello")?;
    fs::create_dir_all(dir.path().join("template"))?;
    for name in ["entry", "list", "index"].iter() {
        fs::write(dir.path().join(format!("template/{}.html", name)), "{{.title}}")?;
    }

    let output = kiln(&dir, &["-v"])?;
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout)?;
    assert!(stdout.contains("copy: robots.txt"));
    assert!(stdout.contains("create: blog/hi/index.html"));
    assert!(output.stderr.is_empty());
    assert!(dir.path().join("public/blog/index.html").is_file());
    Ok(())
}

#[test]
fn test_fatal_errors_go_to_stderr() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    let output = kiln(&dir, &["-v", "-c", "missing.yaml"])?;
    assert_eq!(Some(1), output.status.code());
    assert!(output.stdout.is_empty());
    let stderr = String::from_utf8(output.stderr)?;
    assert!(stderr.starts_with("error: "));
    assert!(stderr.contains("missing.yaml"));
    Ok(())
}
