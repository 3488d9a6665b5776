use std::ffi::OsString;
use std::io;
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};

use tracing::{debug, error};

use super::cover::{self, CoverArt};
use super::{ExtractError, ExtractRequest, ToolSettings};
use crate::album::tags::TagSet;

/// `--tag=NAME=VALUE`, one argument per value
pub fn tag_args(tags: &TagSet) -> Vec<String> {
    tags.iter()
        .flat_map(|(key, values)| values.iter().map(move |v| format!("--tag={}={}", key, v)))
        .collect()
}

fn decode_args(request: &ExtractRequest) -> Vec<OsString> {
    vec![
        "-d".into(),
        "--silent".into(),
        "--stdout".into(),
        format!("--skip={}", request.start.codec_time()).into(),
        format!("--until={}", request.end.codec_time()).into(),
        request.source.clone().into_os_string(),
    ]
}

fn encode_args(request: &ExtractRequest, cover: Option<&CoverArt>, output: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["--silent".into(), "-f".into(), "--fast".into()];
    args.extend(tag_args(&request.tags).into_iter().map(OsString::from));
    if let Some(cover) = cover {
        // type 3 (front cover), mime/description/dimensions left to the encoder
        let mut picture = OsString::from("--picture=3||||");
        picture.push(cover.path());
        args.push(picture);
    }
    args.push("-o".into());
    args.push(output.as_os_str().to_owned());
    args.push("-".into());
    args
}

fn spawn_error(tool: &Path, e: io::Error) -> ExtractError {
    let tool = tool.display().to_string();
    if e.kind() == io::ErrorKind::NotFound {
        ExtractError::ToolMissing { tool, source: e }
    } else {
        ExtractError::Io(e)
    }
}

fn check_status(tool: &Path, stage: &str, status: ExitStatus) -> Result<(), ExtractError> {
    if status.success() {
        Ok(())
    } else {
        Err(ExtractError::ToolFailed {
            tool: format!("{} ({})", tool.display(), stage),
            status: status.to_string(),
        })
    }
}

/// Decode the track's range and pipe it into a re-encode with the track's tags
pub fn extract(
    tools: &ToolSettings,
    request: &ExtractRequest,
    output: &Path,
) -> Result<(), ExtractError> {
    let cover = cover::find_cover(&request.source, &tools.temp_dir);

    let decode_args = decode_args(request);
    let encode_args = encode_args(request, cover.as_ref(), output);
    debug!("Decode command: {:?} {:?}", tools.codec, decode_args);
    debug!("Encode command: {:?} {:?}", tools.codec, encode_args);

    let mut decoder = Command::new(&tools.codec)
        .args(&decode_args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| spawn_error(&tools.codec, e))?;

    let pcm = match decoder.stdout.take() {
        Some(pcm) => pcm,
        None => {
            let _ = decoder.kill();
            let _ = decoder.wait();
            return Err(ExtractError::Io(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "decoder stdout not captured",
            )));
        }
    };

    let encoded = Command::new(&tools.codec)
        .args(&encode_args)
        .stdin(Stdio::from(pcm))
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();

    let encoded = match encoded {
        Ok(status) => status,
        Err(e) => {
            let _ = decoder.kill();
            let _ = decoder.wait();
            return Err(spawn_error(&tools.codec, e));
        }
    };
    let decoded = decoder.wait()?;

    let result = check_status(&tools.codec, "decode", decoded)
        .and_then(|_| check_status(&tools.codec, "encode", encoded));
    if let Err(e) = &result {
        error!(
            "Failed to extract track #{} from {:?}: {}",
            request.num, request.source, e
        );
    }
    result
}
