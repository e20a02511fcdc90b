// This file is part of Skylight DVR, an over-the-air television recorder.
// Copyright (C) 2025 The Skylight DVR Authors.
// SPDX-License-Identifier: GPL-3.0-or-later

//! String helpers for command and path templates.

/// Expands `{name}` placeholders in `spec` with the supplied values.
///
/// Unknown placeholders are left untouched so that a typo in a configured
/// template shows up verbatim in logs rather than silently vanishing.
pub fn expand_placeholders(spec: &str, vars: &[(&str, &str)]) -> String {
    let mut out = spec.to_owned();
    for (name, value) in vars {
        out = out.replace(&format!("{{{name}}}"), value);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::expand_placeholders;

    #[test]
    fn expand() {
        assert_eq!(
            expand_placeholders("/video/{recordingID}.ts", &[("recordingID", "42")]),
            "/video/42.ts"
        );
        assert_eq!(
            expand_placeholders(
                "ffmpeg -i {videoFile} -r {framesPerSecond} {imageDir}/%08d.jpg",
                &[
                    ("videoFile", "/video/42.mp4"),
                    ("framesPerSecond", "0.1"),
                    ("imageDir", "/tmp/frames"),
                ]
            ),
            "ffmpeg -i /video/42.mp4 -r 0.1 /tmp/frames/%08d.jpg"
        );
    }

    #[test]
    fn unknown_placeholder_left_alone() {
        assert_eq!(
            expand_placeholders("/video/{recordingId}.ts", &[("recordingID", "42")]),
            "/video/{recordingId}.ts"
        );
    }
}
