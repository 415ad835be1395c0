use regex::Regex;
use scraper::Selector;
use std::sync::LazyLock;

macro_rules! selector {
    ($name:ident, $css:expr) => {
        pub(crate) static $name: LazyLock<Selector> = LazyLock::new(|| Selector::parse($css).unwrap());
    };
}

macro_rules! regex {
    ($name:ident, $regex:expr) => {
        pub(crate) static $name: LazyLock<Regex> = LazyLock::new(|| Regex::new($regex).unwrap());
    };
}

// Every element: references can hang off almost any of them (lazy-load
// attributes, inline styles, SVG images).
selector!(ANY_ELEMENT_SELECTOR, "*");
selector!(STYLE_ELEMENT_SELECTOR, "style");

regex!(CSS_COMMENT_REGEX, r"(?s)/\*.*?\*/");
regex!(CSS_URL_REGEX, r#"url\(\s*(?:"([^"]*)"|'([^']*)'|([^)"'\s]*))\s*\)"#);
regex!(CSS_IMPORT_REGEX, r#"@import\s+(?:"([^"]*)"|'([^']*)')"#);

// One path component naming a volume of a merged omnibus: `book1`, `vol_02`,
// `Volume 3`, `part-4`.
regex!(VOLUME_DIR_REGEX, r"(?i)^(?:book|vol|volume|part)[\s_-]*0*(\d+)$");
regex!(
    BUNDLE_TITLE_REGEX,
    r"(?i)\b(?:omnibus|collection|box(?:ed)?[\s-]*set|trilogy|tetralogy|quartet|duology|complete\s+(?:novels|series|works|saga)|books?\s+\d+\s*(?:-|–|to|&|and)\s*\d+)\b"
);

regex!(NOVELLA_REGEX, r"(?i)\bnovell?as?\b");
regex!(NOVEL_REGEX, r"(?i)\bnovel\b");
regex!(STORY_REGEX, r"(?i)\b(?:stor(?:y|ies)|tales?)\b");
regex!(
    SUPPLEMENT_REGEX,
    r"(?i)^\s*(?:preface|foreword|introduction|prologue to the collection|afterword|appendix|appendices|acknowledge?ments?|about the author|also by|copyright|glossary|dedication|bonus|excerpt|title page|cover|contents|table of contents|notes?)\b"
);
