//! Carrier response XML (TwiML) builders.
//!
//! Every interpolated value goes through [`xml_escape`]; caller numbers
//! and lookup results are attacker-influenced input.

/// Escape the five XML special characters.
pub fn xml_escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

/// Scheme for the media-stream URL: plain `ws` for local development
/// hosts, `wss` for anything reachable from the carrier.
pub fn stream_scheme(host: &str) -> &'static str {
    let bare = host.split(':').next().unwrap_or(host);
    if bare == "localhost" || bare == "127.0.0.1" || bare == "::1" {
        "ws"
    } else {
        "wss"
    }
}

/// XML that instructs the carrier to open the bidirectional media stream,
/// carrying named parameters into the stream's `start` frame.
pub fn stream_connect(host: &str, parameters: &[(&str, &str)]) -> String {
    let scheme = stream_scheme(host);
    let mut xml = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<Response>\n");
    xml.push_str("  <Connect>\n");
    xml.push_str(&format!(
        "    <Stream url=\"{scheme}://{}/media-stream\">\n",
        xml_escape(host)
    ));
    for (name, value) in parameters {
        xml.push_str(&format!(
            "      <Parameter name=\"{}\" value=\"{}\"/>\n",
            xml_escape(name),
            xml_escape(value)
        ));
    }
    xml.push_str("    </Stream>\n  </Connect>\n</Response>\n");
    xml
}

/// Spoken apology plus hangup, used when the webhook request is unusable.
/// The caller hears something rather than a dropped line.
pub fn apology_hangup(message: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<Response>\n  <Say language=\"ja-JP\">{}</Say>\n  <Hangup/>\n</Response>\n",
        xml_escape(message)
    )
}

/// Blind transfer to a human agent, with a status callback so the
/// outcome of the dial is observable.
pub fn dial_transfer(number: &str, status_callback: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<Response>\n  <Dial>\n    <Number statusCallback=\"{}\" statusCallbackEvent=\"completed\">{}</Number>\n  </Dial>\n</Response>\n",
        xml_escape(status_callback),
        xml_escape(number)
    )
}

/// Announcement plus looped hold music.
pub fn hold_music(announcement: &str, audio_url: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<Response>\n  <Say language=\"ja-JP\">{}</Say>\n  <Play loop=\"0\">{}</Play>\n</Response>\n",
        xml_escape(announcement),
        xml_escape(audio_url)
    )
}
