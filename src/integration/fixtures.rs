//! Test fixtures for integration tests
//!
//! Provides a stand-in ffmpeg so the pipeline can be exercised without real
//! media files or an installed ffmpeg.
//!
//! The stand-in is one shell script shared by all tests. What it does is
//! decided by the input file it is given, so every test gets its own
//! behavior without writing a new executable:
//!
//! ```text
//! produce <n>            write part_000.m4a .. part_<n-1>.m4a
//! fail <code> <message>  print <message> to stderr, exit with <code>
//! hang                   sleep until killed
//! <second line>          file the argument list is recorded to
//! ```

use axum::body::Body;
use axum::http::{header, Request};
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tempfile::TempDir;

use crate::config::{AudioConfig, ServerConfig};
use crate::pipeline::transcode::SegmentTranscoder;

const FAKE_FFMPEG_SCRIPT: &str = r#"#!/bin/sh
in=""
prev=""
out=""
for a in "$@"; do
  if [ "$prev" = "-i" ]; then in="$a"; fi
  prev="$a"
  out="$a"
done
{ read -r mode arg1 rest; read -r record; } < "$in"
if [ -n "$record" ]; then printf '%s\n' "$@" > "$record"; fi
case "$mode" in
  produce)
    i=0
    while [ "$i" -lt "$arg1" ]; do
      printf 'segment %d payload\n' "$i" > "$(printf "$out" "$i")"
      i=$((i + 1))
    done
    ;;
  fail)
    echo "$rest" >&2
    exit "$arg1"
    ;;
  hang)
    exec sleep 30
    ;;
esac
exit 0
"#;

/// Path of the shared stand-in ffmpeg, written on first use
pub fn fake_ffmpeg_path() -> &'static Path {
    static SCRIPT: OnceLock<(TempDir, PathBuf)> = OnceLock::new();
    let (_, path) = SCRIPT.get_or_init(|| {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ffmpeg");
        std::fs::write(&path, FAKE_FFMPEG_SCRIPT).unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        (dir, path)
    });
    path
}

/// One scripted ffmpeg behavior
#[derive(Debug)]
pub struct FakeFfmpeg {
    _dir: TempDir,
    input: PathBuf,
    args_file: PathBuf,
}

impl FakeFfmpeg {
    fn scripted(command: String) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input.mp4");
        let args_file = dir.path().join("args.txt");
        let contents = format!("{}\n{}\n", command, args_file.display());
        std::fs::write(&input, contents).unwrap();
        Self {
            _dir: dir,
            input,
            args_file,
        }
    }

    /// Succeed after writing `count` segment files
    pub fn producing(count: usize) -> Self {
        Self::scripted(format!("produce {}", count))
    }

    /// Exit with `code` after printing `message` to stderr
    pub fn failing(code: i32, message: &str) -> Self {
        Self::scripted(format!("fail {} {}", code, message))
    }

    /// Never exit on its own
    pub fn hanging() -> Self {
        Self::scripted("hang".to_string())
    }

    /// Input file to hand to the transcoder
    pub fn input(&self) -> &Path {
        &self.input
    }

    /// Input file contents, for use as an upload body
    pub fn input_bytes(&self) -> Vec<u8> {
        std::fs::read(&self.input).unwrap()
    }

    pub fn transcoder(&self) -> SegmentTranscoder {
        SegmentTranscoder::new(fake_ffmpeg_path(), AudioConfig::default())
    }

    /// Server configuration using the stand-in ffmpeg and `temp_dir`
    pub fn server_config(&self, temp_dir: &Path) -> ServerConfig {
        ServerConfig {
            temp_dir: temp_dir.to_path_buf(),
            ffmpeg_path: fake_ffmpeg_path().to_path_buf(),
            ..Default::default()
        }
    }

    /// Arguments of the most recent run, one per element
    pub fn recorded_args(&self) -> Vec<String> {
        std::fs::read_to_string(&self.args_file)
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }
}

const BOUNDARY: &str = "segment-splitter-test-boundary";

/// Build a multipart POST carrying `data` in the field `field`
pub fn multipart_request(uri: &str, field: &str, data: &[u8]) -> Request<Body> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"{}\"; filename=\"input.mp4\"\r\n",
            field
        )
        .as_bytes(),
    );
    body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());

    Request::post(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap()
}

/// Entry names and contents of a ZIP archive, in archive order
pub fn read_zip(archive: &[u8]) -> Vec<(String, Vec<u8>)> {
    let mut zip = zip::ZipArchive::new(Cursor::new(archive)).unwrap();
    (0..zip.len())
        .map(|i| {
            let mut entry = zip.by_index(i).unwrap();
            let mut data = Vec::new();
            entry.read_to_end(&mut data).unwrap();
            (entry.name().to_string(), data)
        })
        .collect()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_fixture_input_layout() {
        let fake = FakeFfmpeg::failing(2, "boom");
        let text = String::from_utf8(fake.input_bytes()).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("fail 2 boom"));
        assert!(lines.next().unwrap().ends_with("args.txt"));
    }

    #[test]
    fn test_script_is_shared() {
        assert_eq!(fake_ffmpeg_path(), fake_ffmpeg_path());
        assert!(fake_ffmpeg_path().exists());
    }

    #[test]
    fn test_multipart_request_headers() {
        let request = multipart_request("/split", "file", b"abc");
        let content_type = request.headers()[header::CONTENT_TYPE].to_str().unwrap();
        assert!(content_type.starts_with("multipart/form-data; boundary="));
    }
}
