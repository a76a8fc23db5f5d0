//! Bundled generation modules

use super::Generator;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::Value;

pub const SPECIAL_CHAR_MODULE: &str = "specialCharGenModule";
pub const HTML_MODULE: &str = "HTMLGenModule";

const SPECIAL_CHARS: &[char] = &[
    '<', '>', '"', '\'', '&', ';', '/', '\\', '%', '{', '}', '(', ')', '[', ']', '=', '`', '$',
    '#', '!', '*', '|', '\n', '\0',
];

const MAX_SPECIAL_LEN: usize = 8;

/// Strings of special characters, for probing input filters
#[derive(Debug)]
pub struct SpecialCharGenerator {
    rng: StdRng,
}

impl SpecialCharGenerator {
    pub fn new(seed: u64) -> Self {
        SpecialCharGenerator {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    fn next_value(&mut self) -> String {
        let len = self.rng.random_range(1..=MAX_SPECIAL_LEN);
        (0..len)
            .map(|_| SPECIAL_CHARS[self.rng.random_range(0..SPECIAL_CHARS.len())])
            .collect()
    }
}

impl Generator for SpecialCharGenerator {
    fn name(&self) -> &str {
        "Special Char Generator"
    }

    fn description(&self) -> &str {
        "This module generates special characters to test filtering functions"
    }

    fn generate(&mut self, batch_size: usize) -> Vec<Value> {
        (0..batch_size)
            .map(|_| Value::String(self.next_value()))
            .collect()
    }
}

const HTML_TAGS: &[&str] = &[
    "<!--", "-->", "<!DOCTYPE>", "<a>", "<abbr>", "<address>", "<applet>", "<area>", "<article>",
    "<aside>", "<audio>", "<b>", "<base>", "<bdo>", "<big>", "<blockquote>", "<body>", "<br>",
    "<button>", "<canvas>", "<caption>", "<center>", "<cite>", "<code>", "<col>", "<colgroup>",
    "<datalist>", "<dd>", "<del>", "<details>", "<dialog>", "<dfn>", "<div>", "<dl>", "<dt>",
    "<em>", "<embed>", "<fieldset>", "<figure>", "<font>", "<footer>", "<form>", "<frame>",
    "<frameset>", "<h1>", "<h2>", "<h3>", "<h4>", "<h5>", "<h6>", "<head>", "<header>", "<hr>",
    "<html>", "<i>", "<iframe>", "<img>", "<input>", "<ins>", "<kbd>", "<label>", "<legend>",
    "<li>", "<link>", "<map>", "<mark>", "<menu>", "<meta>", "<meter>", "<nav>", "<noframes>",
    "<noscript>", "<object>", "<ol>", "<optgroup>", "<option>", "<output>", "<p>", "<param>",
    "<pre>", "<progress>", "<q>", "<rp>", "<rt>", "<ruby>", "<s>", "<samp>", "<script>",
    "<section>", "<select>", "<small>", "<source>", "<span>", "<strike>", "<strong>", "<style>",
    "<sub>", "<sup>", "<table>", "<tbody>", "<td>", "<textarea>", "<tfoot>", "<th>", "<thead>",
    "<time>", "<title>", "<tr>", "<tt>", "<u>", "<ul>", "<var>", "<video>", "<xmp>",
];

/// Broken HTML: a random tag, sometimes glued to a random word
#[derive(Debug)]
pub struct HtmlGenerator {
    rng: StdRng,
}

impl HtmlGenerator {
    pub fn new(seed: u64) -> Self {
        HtmlGenerator {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    fn word(&mut self) -> String {
        let len = self.rng.random_range(3..=8);
        (0..len)
            .map(|_| char::from(b'a' + self.rng.random_range(0..26u8)))
            .collect()
    }

    fn next_value(&mut self) -> String {
        let tag = HTML_TAGS[self.rng.random_range(0..HTML_TAGS.len())];
        if self.rng.random_bool(0.5) {
            format!("{}{}", self.word(), tag)
        } else {
            tag.to_string()
        }
    }
}

impl Generator for HtmlGenerator {
    fn name(&self) -> &str {
        "HTML Generator"
    }

    fn description(&self) -> &str {
        "This module generates broken HTML code by randomly selecting HTML tags from a list"
    }

    fn generate(&mut self, batch_size: usize) -> Vec<Value> {
        (0..batch_size)
            .map(|_| Value::String(self.next_value()))
            .collect()
    }
}
